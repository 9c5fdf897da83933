use anyhow::Result;

fn main() -> Result<()> {
    genvault::cli::run()
}
