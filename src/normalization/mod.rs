pub mod money;
pub mod order;
pub mod slug;
pub mod text;
