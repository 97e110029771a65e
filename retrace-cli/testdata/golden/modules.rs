mod storage {
    pub fn persist(data: &[u8]) -> Result<(), retrace::Traced> {
        write_all(data)
    }

    fn write_all(_data: &[u8]) -> Result<(), retrace::Traced> {
        Ok(())
    }
}

pub fn save(data: &[u8]) -> Result<(), retrace::Traced> {
    storage::persist(data)
}
