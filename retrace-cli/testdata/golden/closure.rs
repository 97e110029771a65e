fn spawn_workers() -> Result<(), retrace::Traced> {
    let task = |id: u32| -> Result<(), retrace::Traced> {
        if id == 0 {
            return Err(retrace::msg("bad id"));
        }
        begin(id)
    };
    task(1)?;
    let untyped = |id: u32| begin(id);
    untyped(2)?;
    Ok(())
}

fn begin(_id: u32) -> Result<(), retrace::Traced> {
    Ok(())
}
