fn load() -> Result<(), retrace::Traced> {
    fetch()?; // retrace:skip
    fetch()?;
    Ok(())
}

fn fallback() -> Result<(), retrace::Traced> {
    Ok(()) // retrace:skip (never fires)
}

fn fetch() -> Result<(), retrace::Traced> {
    Ok(())
}
