struct Guarded {
    inner: Result<(), retrace::Traced>,
}

impl Guarded {
    fn trace(self) -> Result<(), retrace::Traced> {
        self.inner
    }

    fn take(self) -> Result<(), retrace::Traced> {
        self.inner
    }
}
