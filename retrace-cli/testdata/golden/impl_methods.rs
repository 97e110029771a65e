use retrace::Result;

pub struct Store {
    path: String,
}

impl Store {
    pub fn open(path: &str) -> Result<Store> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(retrace::errorf!("{path} is not a file"));
        }
        Ok(Store {
            path: path.to_owned(),
        })
    }

    pub fn read(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}
