mod cascade;
mod engine;
mod retry;
#[cfg(test)]
mod testing;

pub use engine::Synchronizer;
pub use retry::RetryPolicy;
