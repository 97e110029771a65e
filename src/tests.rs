//! Unit tests for retrace.
//!
//! These live in a separate file for organization but stay under `src/` to
//! retain access to crate-private items. End-to-end rendering scenarios are
//! in `tests/`.

use std::io;

use crate::{
    caller, errorf, format_string, join, msg, wrap, Caller, ErrorExt, ResultExt, TraceLast,
    Traced, Tracer, Unwrapped,
};

fn io_err(text: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, text.to_owned())
}

#[test]
fn traced_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Traced>();
}

#[test]
fn message_forwards_to_inner() {
    let err = wrap(io_err("disk on fire"));
    assert_eq!(err.to_string(), "disk on fire");

    let err = wrap(wrap(err));
    assert_eq!(err.to_string(), "disk on fire");
}

#[test]
fn msg_and_errorf_create_annotated_errors() {
    let err = msg("plain");
    assert_eq!(err.to_string(), "plain");
    assert_ne!(err.trace_pc(), 0);

    let err = errorf!("key {} missing", "name");
    assert_eq!(err.to_string(), "key name missing");
    assert_ne!(err.trace_pc(), 0);
}

#[test]
fn message_honors_width() {
    let err = msg("failed");
    assert_eq!(format!("{err:12}").len(), 12);
}

#[test]
fn each_wrap_adds_one_frame_with_a_distinct_pc() {
    let e1 = wrap(io_err("x"));
    let e2 = wrap(e1);
    let e3 = wrap(e2);

    let mut pcs = Vec::new();
    let mut cur = e3.clone();
    loop {
        pcs.push(cur.trace_pc());
        let next = match cur.unwrap_frame().1 {
            Unwrapped::Traced(inner) => Some(inner.clone()),
            _ => None,
        };
        match next {
            Some(inner) => cur = inner,
            None => break,
        }
    }
    assert_eq!(pcs.len(), 3);
    assert!(pcs.iter().all(|&pc| pc != 0));
    pcs.sort_unstable();
    pcs.dedup();
    assert_eq!(pcs.len(), 3, "wrap sites on distinct lines must capture distinct PCs");

    assert_eq!(e3.frames().count(), 3);
}

#[test]
fn ok_path_is_untouched() {
    let ok: Result<u32, io::Error> = Ok(7);
    assert_eq!(ok.trace().unwrap(), 7);

    let ok: Result<u32, Traced> = Ok(7);
    assert_eq!(ok.trace().unwrap(), 7);
}

#[test]
fn trace_annotates_the_err_path() {
    let res: Result<(), io::Error> = Err(io_err("nope"));
    let err = res.trace().unwrap_err();
    assert_eq!(err.to_string(), "nope");
    assert_ne!(err.trace_pc(), 0);
}

#[test]
fn question_mark_adopts_foreign_errors() {
    fn parse(input: &str) -> crate::Result<i32> {
        let n: i32 = input.parse()?;
        Ok(n)
    }

    let err = parse("not a number").unwrap_err();
    assert!(err.is::<std::num::ParseIntError>());
    // The adoption site is recorded as a frame.
    assert_ne!(err.trace_pc(), 0);
}

#[test]
fn downcast_sees_through_wrapping() {
    let err = wrap(wrap(io_err("inner")));
    assert!(err.is::<io::Error>());
    assert_eq!(err.downcast_ref::<io::Error>().map(|e| e.to_string()),
        Some("inner".to_owned()));
    assert!(!err.is::<std::num::ParseIntError>());
}

#[test]
fn downcast_walks_source_chains() {
    #[derive(Debug)]
    struct Outer(io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "outer: {}", self.0)
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    let err = wrap(Outer(io_err("root")));
    assert!(err.is::<Outer>());
    assert!(err.is::<io::Error>());
}

#[test]
fn downcast_searches_join_children_in_order() {
    let err = wrap(join(vec![io_err("first"), io_err("second")]));
    assert_eq!(
        err.downcast_ref::<io::Error>().map(|e| e.to_string()),
        Some("first".to_owned())
    );
}

#[test]
fn join_message_joins_children_with_newlines() {
    let err = join([msg("one"), msg("two")]);
    assert_eq!(err.to_string(), "one\ntwo");
    // The join itself contributes no frame.
    assert_eq!(err.trace_pc(), 0);
}

#[test]
fn clones_share_the_node() {
    let err = wrap(io_err("shared"));
    let other = err.clone();
    assert_eq!(err.trace_pc(), other.trace_pc());
    assert_eq!(err.to_string(), other.to_string());
}

#[test]
fn unwrap_frame_classifies_the_inner() {
    let adopted = wrap(io_err("x"));
    assert!(matches!(adopted.unwrap_frame().1, Unwrapped::Foreign(_)));

    let chained = wrap(adopted);
    assert!(matches!(chained.unwrap_frame().1, Unwrapped::Traced(_)));

    let terminal = msg("x");
    assert!(matches!(terminal.unwrap_frame().1, Unwrapped::Terminal));

    let joined = join([msg("a"), msg("b")]);
    match joined.unwrap_frame().1 {
        Unwrapped::Joined(children) => assert_eq!(children.len(), 2),
        _ => panic!("expected a join"),
    }
}

#[test]
fn wrap_site_frame_points_at_this_file() {
    let err = wrap(io_err("here"));
    let frame = err.frame().expect("wrap PC should symbolize in test builds");
    assert!(
        frame.file.ends_with("tests.rs"),
        "frame file should be the wrap site, got {}",
        frame.file
    );
    assert!(frame.line > 0);
}

#[test]
fn caller_handle_attributes_to_the_helper_call_site() {
    #[inline(never)]
    fn helper(err: io::Error) -> Traced {
        let captured = caller();
        captured.wrap(err)
    }

    let err = helper(io_err("x"));
    let frame = err.frame().expect("caller PC should symbolize in test builds");
    assert!(
        frame.function.contains("caller_handle_attributes_to_the_helper_call_site"),
        "frame should name the helper's caller, got {}",
        frame.function
    );
    assert!(
        !frame.function.ends_with("helper"),
        "frame must not point inside the helper, got {}",
        frame.function
    );
}

#[test]
fn zero_pc_nodes_are_valid_pass_throughs() {
    let err = Caller::from_pc(0).wrap(io_err("quiet"));
    assert_eq!(err.to_string(), "quiet");
    assert!(err.frame().is_none());
    assert_eq!(err.frames().count(), 0);
    // The node still renders, with no frame lines.
    assert_eq!(format_string(&err), "quiet\n");

    // Wrapping on top contributes its frame as usual.
    let rewrapped = wrap(err);
    assert_eq!(rewrapped.frames().count(), 1);
}

#[test]
fn frame_display_names_the_function_and_location() {
    let err = wrap(io_err("x"));
    let frame = err.frame().expect("frame");
    let shown = frame.to_string();
    assert!(shown.contains(&frame.function), "{shown}");
    assert!(shown.contains(":"), "{shown}");
}

#[test]
fn error_value_traced_in_method_position() {
    let err = io_err("method").traced();
    assert_eq!(err.to_string(), "method");
    assert_ne!(err.trace_pc(), 0);
}

#[test]
fn trace_last_wraps_only_the_final_result() {
    fn produce() -> (u32, Result<(), io::Error>) {
        (7, Err(io_err("pair")))
    }

    let (n, res) = produce().trace_last();
    assert_eq!(n, 7);
    let err = res.unwrap_err();
    assert_eq!(err.to_string(), "pair");
    assert_ne!(err.trace_pc(), 0);

    let (a, b, ok) = (1u8, "x", Ok::<_, io::Error>(2u8)).trace_last();
    assert_eq!((a, b), (1, "x"));
    assert_eq!(ok.unwrap(), 2);
}

#[test]
fn traced_converts_to_boxed_std_error() {
    let err = wrap(io_err("boxed"));
    let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
    assert_eq!(boxed.to_string(), "boxed");
    assert!(boxed.source().is_some());
}

#[test]
fn alternate_display_renders_the_trace() {
    let err = wrap(msg("rendered"));
    let plain = format!("{err}");
    let extended = format!("{err:#}");
    assert_eq!(plain, "rendered");
    assert!(extended.starts_with("rendered\n"));
    assert!(extended.len() > plain.len());
    // Debug matches the extended rendering.
    assert_eq!(format!("{err:?}"), extended);
}
