fn measure() -> (u32, retrace::Result<()>) {
    run_both()
}

fn run_both() -> (u32, retrace::Result<()>) {
    (0, Ok(()))
}
