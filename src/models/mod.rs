pub mod context;
pub mod events;
pub mod glossary;
pub mod pipeline;
pub mod schema;
pub mod session;

pub use context::*;
pub use events::*;
pub use glossary::*;
pub use pipeline::*;
pub use schema::*;
pub use session::*;
