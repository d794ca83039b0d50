use appsody_core::{container, devloop, Context};

pub fn run(ctx: &Context, name: Option<String>) -> anyhow::Result<()> {
    let name = match name {
        Some(n) => n,
        None => devloop::default_container_name(&ctx.project_name()?),
    };
    tracing::info!("Stopping development environment");
    container::stop(ctx, &name)?;
    Ok(())
}
