use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rbind::prelude::*;

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("utf8 output")
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn quiet_session() -> Session {
    Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build()
}

#[test]
fn test_call_mul_with_integers_and_strings() {
    let session = quiet_session();
    session.load_string("def mul(a, b)\n  a * b\nend");

    assert_eq!(session.call::<i32, _>("mul", (10, 20)), Some(200));
    assert_eq!(
        session.call::<String, _>("mul", ("abc", 3)).as_deref(),
        Some("abcabcabc")
    );
}

#[test]
fn test_function_handle_is_reusable() {
    let session = quiet_session();
    session.load_string("def mul(a, b)\n  a * b\nend");

    let mul = session.get_function::<i64, (i64, i64)>("mul");
    assert_eq!(mul.name(), "mul");
    assert!(mul.receiver().is_none());
    assert_eq!(mul.call((6, 7)), Some(42));

    let again = mul.clone();
    assert_eq!(again.call((2, 3)), Some(6));
}

#[test]
fn test_method_handle_uses_receiver() {
    let session = quiet_session();
    let text = session.load_string("'hello world'");

    let upcase = session.get_method_function::<String, ()>(&text, "upcase");
    assert_eq!(upcase.call(()).as_deref(), Some("HELLO WORLD"));
    assert_eq!(
        session.call_on::<bool, _>(&text, "start_with?", ("hello",)),
        Some(true)
    );
}

#[test]
fn test_each_array_visits_in_index_order() {
    let session = quiet_session();
    let array = session.load_string("[10, 20, 30]");

    let mut seen = Vec::new();
    session.each_array::<i64>(&array, |v| seen.push(v));

    assert_eq!(seen, vec![10, 20, 30]);
    assert_eq!(seen.iter().sum::<i64>(), 60);
}

#[test]
fn test_each_array_stops_at_conversion_failure() {
    let session = quiet_session();
    let array = session.load_string("[1, 'two', 3]");

    let mut seen = Vec::new();
    session.each_array::<i64>(&array, |v| seen.push(v));

    assert_eq!(seen, vec![1]);
    let err = session.take_error().expect("type error");
    assert_eq!(err.class_name, "TypeError");
}

#[test]
fn test_each_hash_visits_every_pair() {
    let session = quiet_session();
    let hash = session.load_string("{10 => 'a', 20 => 'b', 30 => 'c'}");

    let mut key_sum = 0;
    let mut values = String::new();
    session.each_hash::<i64, String>(&hash, |k, v| {
        key_sum += k;
        values.push_str(&v);
    });

    assert_eq!(key_sum, 60);
    assert_eq!(values.len(), 3);
}

#[test]
fn test_each_hash_with_symbol_keys() {
    let session = quiet_session();
    let hash = session.load_string("{name: 'bob', city: 'paris'}");

    let mut pairs = Vec::new();
    session.each_hash::<Sym, String>(&hash, |k, v| pairs.push((k, v)));

    let name = session.sym("name");
    assert_eq!(pairs.len(), 2);
    assert!(pairs.contains(&(name, "bob".to_string())));
}

#[test]
fn test_syntax_error_sets_error_state() {
    let session = quiet_session();
    session.load_string("def broken(\n  1 +\n");

    assert!(session.exists_error());
    let err = session.take_error().expect("syntax error");
    assert_eq!(err.class_name, "SyntaxError");

    // the session stays usable
    assert_eq!(session.load_string("1 + 1").as_int(), Some(2));
    assert!(session.check().is_ok());
}

#[test]
fn test_deeply_nested_source_is_a_syntax_error() {
    let session = quiet_session();
    let depth = 10_000;

    session.load_string(&format!("{}1{}", "(".repeat(depth), ")".repeat(depth)));

    assert!(session.exists_error());
    let err = session.take_error().expect("syntax error");
    assert_eq!(err.class_name, "SyntaxError");
    assert!(err.message.contains("nesting too deep"), "{}", err.message);
    assert_eq!(session.load_string("((1 + 1))").as_int(), Some(2));
}

#[test]
fn test_runaway_recursion_raises_with_default_depth() {
    let session = Session::new();

    session.load_string("def g; g; end; g");

    let err = session.take_error().expect("too deep");
    assert_eq!(err.class_name, "SystemStackError");
    assert_eq!(err.message, "stack level too deep");

    session.load_string("def down(n)\n  n == 0 ? 0 : down(n - 1)\nend");
    assert_eq!(session.call::<i64, _>("down", (250,)), Some(0));
}

#[test]
fn test_print_error_if_exists() {
    let err = Capture::default();
    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(err.clone())
        .build();

    session.load_string("1 + 1");
    assert!(!session.print_error_if_exists());
    session.load_string("raise 'broken'");
    assert!(session.print_error_if_exists());

    assert_eq!(err.text(), "line 1: broken (RuntimeError)\n");
    assert!(session.exists_error());
}

#[test]
fn test_debug_print_goes_to_stdout() {
    let out = Capture::default();
    let session = Session::builder()
        .stdout(out.clone())
        .stderr(std::io::sink())
        .build();

    let value = session.load_string("[1, 'a', :b, nil]");
    session.p(&value);
    session.load_string("puts 'done'");

    assert_eq!(out.text(), "[1, \"a\", :b, nil]\ndone\n");
}

#[test]
fn test_load_file_keeps_definitions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("lib.rb");
    std::fs::write(&path, "def triple(x)\n  x * 3\nend\nbase = 7\n").expect("write script");

    let session = quiet_session();
    session.load_file(&path);
    assert!(!session.exists_error());

    assert_eq!(session.call::<i64, _>("triple", (5,)), Some(15));
    assert_eq!(session.load_string("triple(base)").as_int(), Some(21));
}

#[test]
fn test_load_file_missing_does_not_crash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = quiet_session();

    let value = session.load_file(dir.path().join("nope.rb"));

    assert!(session.is_nil(&value));
    let err = session.take_error().expect("io error");
    assert_eq!(err.class_name, "IOError");
}

#[test]
fn test_define_function_round_trips_types() {
    let session = quiet_session();
    session.define_function("add", |a: i64, b: i64| a + b);
    session.define_function("shout", |s: String, times: u8| s.to_uppercase().repeat(times.into()));
    session.define_function("half", |v: f64| v / 2.0);

    assert_eq!(session.load_string("add(2, 3)").as_int(), Some(5));
    let shouted = session.load_string("shout('hey', 2)");
    assert_eq!(session.to_string(&shouted), "HEYHEY");
    assert_eq!(session.load_string("half(5)").as_float(), Some(2.5));

    session.load_string("shout('hey', 300)");
    let err = session.take_error().expect("range error");
    assert_eq!(err.class_name, "RangeError");
    assert_eq!(err.message, "integer 300 too big to convert to 'u8'");
}

#[test]
fn test_call_depth_is_configurable() {
    let session = Session::builder()
        .max_call_depth(32)
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    session.load_string("def down(n)\n  n == 0 ? 0 : down(n - 1)\nend");

    assert_eq!(session.call::<i64, _>("down", (10,)), Some(0));
    assert_eq!(session.call::<i64, _>("down", (100,)), None);
    let err = session.take_error().expect("too deep");
    assert_eq!(err.class_name, "SystemStackError");
}

#[test]
fn test_filename_appears_in_errors() {
    let session = Session::builder()
        .filename("config.rb")
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();

    session.load_string("x = 1\nraise ArgumentError, 'bad'");

    assert_eq!(
        session.error_string().as_deref(),
        Some("config.rb:2: bad (ArgumentError)")
    );
}
