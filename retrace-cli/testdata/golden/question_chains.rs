fn load(dir: &str) -> Result<String, retrace::Traced> {
    let listing = std::fs::read_dir(dir)?.count();
    let text = std::fs::read_to_string(dir)?.trim().to_owned();
    if listing == 0 && text.is_empty() {
        return Err(retrace::msg("empty"));
    }
    Ok(text)
}
