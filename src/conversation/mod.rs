//! Conversation data: history, prompt context and reply parsing

mod context;
mod history;
mod reply;

pub use context::{
    ContextAssembler, DEFAULT_CONTENT_BUDGET, PromptContext, SYSTEM_INSTRUCTIONS, SiteContent,
    SiteEntry,
};
pub use history::{ConversationHistory, ConversationTurn, Role};
pub use reply::AssistantReply;
