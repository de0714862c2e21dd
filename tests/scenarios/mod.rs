//! End-to-end workflow scenarios against a scripted invoker

mod cancellation;
mod ci_pipeline;
mod concurrency;
mod definitions;
mod properties;
mod retries;
mod secrets;
mod skip_propagation;
