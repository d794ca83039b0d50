use appsody_core::APPSODY_VERSION;

pub fn run() -> anyhow::Result<()> {
    println!("appsody {APPSODY_VERSION}");
    Ok(())
}
