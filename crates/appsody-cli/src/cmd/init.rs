use anyhow::Context as _;
use appsody_core::init::{self, InitOptions};
use appsody_core::Context;

pub fn run(ctx: &Context, opts: InitOptions) -> anyhow::Result<()> {
    match &opts.stack {
        Some(stack) => {
            init::init(ctx, &opts).with_context(|| format!("could not initialize project with {stack}"))
        }
        None => Ok(init::init(ctx, &opts)?),
    }
}
