use appsody_core::container::Engine;
use appsody_core::extract::{self, ExtractOptions};
use appsody_core::Context;
use std::path::PathBuf;

pub fn run(
    ctx: Context,
    target_dir: Option<PathBuf>,
    name: Option<String>,
    buildah: bool,
) -> anyhow::Result<()> {
    let ctx = if buildah { ctx.with_engine(Engine::Buildah) } else { ctx };
    let opts = ExtractOptions {
        target_dir,
        container_name: name,
    };
    extract::extract(&ctx, &opts)?;
    Ok(())
}
