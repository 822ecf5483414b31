use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sio::{
    compile,
    error::ErrorKind,
    event::Event,
    register::MAX_MEMORY_CELLS,
    Fault,
    Node,
    Value,
};

fn run(source: &str) -> Node {
    let node = compile(source).unwrap();
    node.run().unwrap();
    node
}

fn value(node: &Node, register: &str) -> Value {
    node.register(register)
        .unwrap_or_else(|| panic!("no register {}", register))
        .get()
        .unwrap()
}

#[test]
fn test_accumulate() {
    let node = run(include_str!("accumulate.sio"));

    assert_eq!(value(&node, "acc"), Value::Int(8));
    assert_eq!(value(&node, "clk"), Value::Int(1));
}

#[test]
fn test_branches() {
    let node = run(include_str!("branches.sio"));

    assert_eq!(value(&node, "out"), Value::from("yes"));
    assert_eq!(value(&node, "cmp"), Value::from("less"));
    assert_eq!(value(&node, "deep"), Value::from("nested"));
    assert_eq!(value(&node, "inline"), Value::from("inline yes"));
}

#[test]
fn test_run_once() {
    let node = compile(include_str!("run_once.sio")).unwrap();

    let executed = Arc::new(AtomicUsize::new(0));
    let skipped = Arc::new(AtomicUsize::new(0));

    {
        let executed = executed.clone();
        let skipped = skipped.clone();

        node.add_listener(move |event: &Event| match event {
            Event::Executed { position: 2, .. } => {
                executed.fetch_add(1, Ordering::SeqCst);
            },
            Event::Skipped { position: 2 } => {
                skipped.fetch_add(1, Ordering::SeqCst);
            },
            _ => (),
        });
    }

    node.run().unwrap();

    assert_eq!(value(&node, "total"), Value::Int(5));
    assert_eq!(value(&node, "i"), Value::Int(10));
    assert_eq!(executed.load(Ordering::SeqCst), 1);
    assert_eq!(skipped.load(Ordering::SeqCst), 9);
}

#[test]
fn test_memory() {
    let node = run(include_str!("memory.sio"));

    assert_eq!(value(&node, "after_five"), Value::Int(1));
    assert_eq!(value(&node, "after_last"), Value::Int(3));
    assert_eq!(value(&node, "tail"), Value::from("third"));
}

#[test]
fn test_string_arithmetic() {
    let node = run(r#"
        mov -1 clk
        mov "ab" acc
        mul 3
        mov acc $repeated
        mov "n=" acc
        add 4
        end
    "#);

    assert_eq!(value(&node, "repeated"), Value::from("ababab"));
    assert_eq!(value(&node, "acc"), Value::from("n=4"));
}

#[test]
fn test_oversized_memory_faults_node() {
    let node = compile("&m\nmov -1 clk\nmov 2000000000 m_i\nmov 1 m\nend").unwrap();

    assert_eq!(
        node.run(),
        Err(Fault::OutOfMemory { requested: 2_000_000_001, limit: MAX_MEMORY_CELLS }),
    );
    assert!(!node.is_running());
}

#[test]
fn test_parse_error_location() {
    let err = match compile("mov -1 clk\n\nteq acc 0\n+ mvo 1 acc") {
        Ok(_) => panic!("compiled a misspelled instruction"),
        Err(err) => err,
    };

    assert_eq!(err.line, 4);
    assert_eq!(
        err.kind(),
        &ErrorKind::UnknownInstruction { mnemonic: "mvo".into(), suggestion: Some("mov") },
    );
}
