use retrace::Result;

pub fn read_config(path: &str) -> Result<String> {
    let raw = std::fs::read_to_string(path)?;
    if raw.is_empty() {
        return Err(retrace::msg("empty config"));
    }
    Ok(raw)
}

fn helper() -> Result<String> {
    read_config("app.toml")
}
