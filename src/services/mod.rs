pub mod answer_parser;
pub mod formatters;
pub mod keyboards;
pub mod phone;
pub mod scorer;
pub mod session_store;
pub mod window_access;

pub use answer_parser::{parse_answer_text, MalformedInput, ParsedAnswers};
pub use scorer::ScoreCard;
pub use session_store::SessionStore;
pub use window_access::WindowAccessController;
