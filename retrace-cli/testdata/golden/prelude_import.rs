use retrace::prelude::*;

fn run() -> Result<()> {
    step()?;
    Ok(())
}

fn step() -> Result<()> {
    Ok(())
}
