use crate::output::print_table;
use appsody_core::container;

pub fn run() -> anyhow::Result<()> {
    let rows = container::ps()?;
    if rows.is_empty() {
        println!("There are no stack-based containers running in your docker environment");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = rows
        .into_iter()
        .map(|r| vec![r.id, r.name, r.image, r.status])
        .collect();
    print_table(&["CONTAINER ID", "NAME", "IMAGE", "STATUS"], &rows);
    Ok(())
}
