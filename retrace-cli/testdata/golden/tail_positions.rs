fn pick(flag: bool) -> Result<u32, retrace::Traced> {
    if flag {
        parse_one()
    } else {
        match flag {
            true => parse_one(),
            false => Ok(0),
        }
    }
}

fn pick_return(flag: bool) -> Result<u32, retrace::Traced> {
    if flag {
        return parse_one();
    }
    Err(build_error())
}

fn parse_one() -> Result<u32, retrace::Traced> {
    "7".parse().map_err(retrace::wrap)
}

fn build_error() -> retrace::Traced {
    retrace::msg("boom")
}
