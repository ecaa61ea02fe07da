pub mod app;
pub mod dispatcher;

pub use app::App;
pub use dispatcher::EventRouter;
