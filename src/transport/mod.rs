mod completion;
mod http_transport;
mod retry_policy;

pub use completion::{ChunkStream, CompletionService, OpenAiCompletionClient};
pub use http_transport::{build_reqwest_client, post_with_retry};
