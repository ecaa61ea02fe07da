pub mod actor;
pub mod session;
pub mod window;

pub use actor::{Actor, AppealSender, NewAppeal, PhoneLinkOutcome, PhoneMatch, StudentProfile};
pub use session::SessionState;
pub use window::{
    AccessWindow, NewSubmission, SubmissionDetail, SubmissionSummary, TestInfo, TestPage,
    WindowForSubmit,
};
