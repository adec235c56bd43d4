use anyhow::Result;

fn main() -> Result<()> {
    jailrun::cli::run()
}
