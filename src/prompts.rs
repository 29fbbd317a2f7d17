//! Prompt text for the map and reduce phases, keyed by source type.

use crate::{
    conversation::Conversation,
    document::SourceType,
    llm::Message,
    map_reduce::{SummaryStyle, Task},
};

pub fn system_message(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::News => {
            "You are a helpful AI assistant specialized in answering questions about news articles. Provide clear, accurate, and conversational responses."
        }
        SourceType::Video => {
            "You are a helpful AI assistant specialized in answering questions about YouTube videos. Provide clear, accurate, and conversational responses based on video transcripts."
        }
        SourceType::Pdf => {
            "You are a helpful AI assistant specialized in answering questions about PDF documents. Provide clear, accurate, and conversational responses based on document content."
        }
        SourceType::Generic => {
            "You are a helpful AI assistant specialized in answering questions about a personal knowledge base. Provide clear, accurate, and conversational responses based on the stored documents."
        }
    }
}

/// What one chunk is called in a map prompt.
fn unit_name(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::News | SourceType::Generic => "text",
        SourceType::Video => "video transcript",
        SourceType::Pdf => "PDF document section",
    }
}

/// Suffix naming where combined summaries come from.
fn origin_suffix(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::News | SourceType::Generic => "",
        SourceType::Video => " from a YouTube video",
        SourceType::Pdf => " from a PDF document",
    }
}

fn style_words(style: SummaryStyle) -> (&'static str, &'static str) {
    match style {
        SummaryStyle::Concise => ("concise", "CONCISE"),
        SummaryStyle::Detailed => ("detailed", "DETAILED"),
    }
}

/// Messages for one map call: the task descriptor plus a single chunk.
pub fn map_messages(task: &Task, chunk_text: &str) -> Vec<Message> {
    let source_type = task.source_type();
    let unit = unit_name(source_type);

    let prompt = match task {
        Task::Summarize { style, .. } => {
            let (lower, upper) = style_words(*style);
            format!(
                "Write a {lower} summary of the following {unit}:\n\"{chunk_text}\"\n{upper} SUMMARY:"
            )
        }
        Task::Answer { question, .. } => format!(
            "Extract every fact from the following {unit} that helps answer the question. \
             Quote names, numbers and dates exactly. If nothing is relevant, reply \
             \"No relevant information.\"\n\nQuestion: {question}\n\n\"{chunk_text}\"\n\nRELEVANT INFORMATION:"
        ),
    };

    vec![Message::system(system_message(source_type)), Message::user(prompt)]
}

/// Messages for the single reduce call over the ordered map outputs.
pub fn reduce_messages(
    task: &Task,
    outputs: &[&str],
    conversation: Option<&Conversation>,
    history_turns: usize,
) -> Vec<Message> {
    let source_type = task.source_type();

    let prompt = match task {
        Task::Summarize { style, .. } => {
            let (lower, upper) = style_words(*style);
            let origin = origin_suffix(source_type);
            let text = outputs.join("\n\n");
            format!(
                "Write a {lower} summary of the following text that combines the previous summaries{origin}:\n\"{text}\"\nFINAL {upper} SUMMARY:"
            )
        }
        Task::Answer { question, .. } => {
            let history = conversation
                .map(|c| c.render(history_turns))
                .unwrap_or_else(|| crate::conversation::NO_HISTORY.to_string());
            answer_prompt(source_type, &history, &format_context(outputs), question)
        }
    };

    vec![Message::system(system_message(source_type)), Message::user(prompt)]
}

/// Number the context passages as `[Document 1]`, `[Document 2]`, ...
fn format_context(outputs: &[&str]) -> String {
    outputs
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[Document {}]\n{text}\n", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn answer_prompt(
    source_type: SourceType,
    history: &str,
    context: &str,
    question: &str,
) -> String {
    let (subject, label, instructions) = match source_type {
        SourceType::News => (
            "news articles",
            "Articles",
            "- Answer based on the retrieved context and conversation history\n\
             - If the question references previous conversation, use that context\n\
             - Be conversational and natural\n\
             - Cite specific details from the articles when relevant\n\
             - If the context doesn't contain enough information, say so",
        ),
        SourceType::Video => (
            "YouTube video content",
            "Video Transcripts",
            "- Answer based on the retrieved video transcript context and conversation history\n\
             - If the question references previous conversation, use that context\n\
             - Be conversational and natural\n\
             - Reference specific moments or topics from the video when relevant\n\
             - If the context doesn't contain enough information to answer, say so\n\
             - Remember you're discussing video content, so you can mention what was said, explained, or shown",
        ),
        SourceType::Pdf => (
            "PDF documents",
            "Documents",
            "- Answer based on the retrieved document context and conversation history\n\
             - If the question references previous conversation, use that context\n\
             - Be conversational and natural\n\
             - Reference specific sections or pages from the documents when relevant\n\
             - If the context doesn't contain enough information to answer, say so\n\
             - Provide accurate and detailed answers based on the document content",
        ),
        SourceType::Generic => (
            "a knowledge base",
            "Documents",
            "- Answer based on the retrieved context and conversation history\n\
             - If the question references previous conversation, use that context\n\
             - Be conversational and natural\n\
             - If the context doesn't contain enough information, say so",
        ),
    };

    format!(
        "You are a helpful AI assistant answering questions about {subject}.\n\n\
         Previous Conversation:\n{history}\n\n\
         Retrieved Context from {label}:\n{context}\n\n\
         Current Question: {question}\n\n\
         Instructions:\n{instructions}\n\n\
         Answer:"
    )
}
