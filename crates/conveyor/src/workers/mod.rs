//! Worker classes shipped with the `conveyor` binary.
//!
//! One-shot workers process the values dealt to their replica and return:
//! [`Sleepy`], [`SquaredSum`], [`StaticSource`]. Polling workers drain their
//! input queue until `DONE`: [`Stamp`], [`LogSink`], [`JsonLinesSink`].

mod jsonl_sink;
mod log_sink;
mod sleepy;
mod source;
mod squared_sum;
mod stamp;

pub use jsonl_sink::JsonLinesSink;
pub use log_sink::LogSink;
pub use sleepy::Sleepy;
pub use source::StaticSource;
pub use squared_sum::SquaredSum;
pub use stamp::Stamp;

use async_trait::async_trait;
use conveyor_core::{Consumer, Registry, WorkError, Worker, WorkerParams, run_consumer_loop};

/// A [`Consumer`] driven by the shared polling loop.
pub struct Polling<C> {
    params: WorkerParams,
    consumer: C,
}

impl<C: Consumer + 'static> Polling<C> {
    pub fn boxed(params: WorkerParams, consumer: C) -> Box<dyn Worker> {
        Box::new(Self { params, consumer })
    }
}

#[async_trait]
impl<C: Consumer + 'static> Worker for Polling<C> {
    async fn run(self: Box<Self>) -> Result<(), WorkError> {
        let Self {
            params,
            mut consumer,
        } = *self;
        run_consumer_loop(&mut consumer, &params).await?;
        Ok(())
    }
}

/// Register every built-in class on `registry`.
pub fn register_builtins(registry: &mut Registry) -> &mut Registry {
    registry
        .register("Sleepy", |params| Ok(Box::new(Sleepy::new(params)) as Box<dyn Worker>))
        .register("SquaredSum", |params| {
            Ok(Box::new(SquaredSum::new(params)) as Box<dyn Worker>)
        })
        .register("StaticSource", |params| {
            Ok(Box::new(StaticSource::new(params)) as Box<dyn Worker>)
        })
        .register("Stamp", |params| {
            let stamp = Stamp::new(&params);
            Ok(Polling::boxed(params, stamp))
        })
        .register("LogSink", |params| {
            let sink = LogSink::new(&params);
            Ok(Polling::boxed(params, sink))
        })
        .register("JsonLinesSink", |params| {
            let sink = JsonLinesSink::new(&params)?;
            Ok(Polling::boxed(params, sink))
        })
}

/// A registry holding every built-in class.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    register_builtins(&mut registry);
    registry
}
