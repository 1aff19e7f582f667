mod control;
mod credential;
mod link;
mod login;
mod registry;
mod routing;

pub use control::C2sControlMessage;
pub use credential::{CredentialRecord, CredentialStore, InMemoryCredentialStore};
pub use link::{LinkContext, LinkSender};
pub use login::{LoginOutcome, evaluate_login};
pub use registry::{DynamicIdAllocator, UserRegistry};
pub use routing::{RootSink, route_inbound};
