fn measure() -> (u32, retrace::Result<()>) {
    run_both()
}

fn measure_literal() -> (u32, retrace::Result<()>) {
    (1, step())
}

fn run_both() -> (u32, retrace::Result<()>) {
    (0, Ok(()))
}

fn step() -> retrace::Result<()> {
    Ok(())
}
