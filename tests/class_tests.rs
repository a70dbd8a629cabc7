use std::cell::Cell;
use std::rc::Rc;

use rbind::prelude::*;

struct Person {
    name: String,
    age: i32,
}

impl Person {
    fn greeting(&self) -> String {
        format!("My name is {} and I am {} years old.", self.name, self.age)
    }
}

fn person_session() -> (Session, ClassBinding<Person>) {
    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    let binding = session
        .install_class::<Person>("Person", None)
        .expect("install Person")
        .definer(&session)
        .constructor(|name: String, age: i32| Person { name, age })
        .method("greeting", |p: &mut Person| p.greeting())
        .method("greeting_n_times", |p: &mut Person, n: i32| {
            p.greeting().repeat(n.max(0) as usize)
        })
        .method("age_difference", |p: &mut Person, other: Obj<Person>| {
            other.with(|o| p.age - o.age).unwrap_or(0)
        })
        .method("name", |p: &mut Person| p.name.clone())
        .method("age", |p: &mut Person| p.age)
        .method("birthday", |p: &mut Person| {
            p.age += 1;
        })
        .finish();
    (session, binding)
}

#[test]
fn test_greeting_from_script() {
    let (session, _) = person_session();

    let greeting = session.load_string("Person.new('bob', 35).greeting");

    assert_eq!(session.to_string(&greeting), "My name is bob and I am 35 years old.");
}

#[test]
fn test_greeting_n_times_has_no_separator() {
    let (session, _) = person_session();

    let value = session.load_string("Person.new('bob', 35).greeting_n_times(3)");

    assert_eq!(
        session.to_string(&value),
        "My name is bob and I am 35 years old.".repeat(3)
    );
}

#[test]
fn test_age_difference_takes_another_person() {
    let (session, _) = person_session();

    let value = session.load_string("Person.new('A', 42).age_difference(Person.new('B', 33))");

    assert_eq!(value.as_int(), Some(9));
}

#[test]
fn test_nil_argument_becomes_null_handle() {
    let (session, _) = person_session();

    let value = session.load_string("Person.new('A', 42).age_difference(nil)");

    assert_eq!(value.as_int(), Some(0));
    assert!(!session.exists_error());
}

#[test]
fn test_foreign_argument_becomes_null_handle() {
    let (session, _) = person_session();

    let value = session.load_string("Person.new('A', 42).age_difference(5)");

    assert_eq!(value.as_int(), Some(0));
    assert!(!session.exists_error());
}

#[test]
fn test_unboxing_a_foreign_value_gives_null_handle() {
    let (session, _) = person_session();
    session.load_string("def text\n  'x'\nend\ndef nobody\n  nil\nend");

    let handle = session.call::<Obj<Person>, _>("text", ()).expect("null handle");
    assert!(handle.is_null());
    assert!(!session.exists_error());

    let handle = session.call::<Obj<Person>, _>("nobody", ()).expect("null handle");
    assert!(handle.is_null());

    let mixed = session.load_string("[Person.new('a', 1), 'b']");
    let mut nulls = Vec::new();
    session.each_array::<Obj<Person>>(&mixed, |p| nulls.push(p.is_null()));
    assert_eq!(nulls, vec![false, true]);
    assert!(!session.exists_error());
}

#[test]
fn test_receiver_passed_as_its_own_argument() {
    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    session
        .install_class::<Person>("Person", None)
        .expect("install Person")
        .definer(&session)
        .constructor(|age: i32| Person {
            name: String::new(),
            age,
        })
        .method_ref("sum_ages", |p: &Person, other: Obj<Person>| {
            other.with(|o| p.age + o.age).unwrap_or(-1)
        })
        .method("merge_ages", |p: &mut Person, other: Obj<Person>| {
            p.age += other.with(|o| o.age).unwrap_or(0);
        });

    let sum = session.load_string("p = Person.new(20)\np.sum_ages(p)");
    assert_eq!(sum.as_int(), Some(40));
    let sum = session.load_string("p.sum_ages(Person.new(1))");
    assert_eq!(sum.as_int(), Some(21));
    assert!(!session.exists_error());

    session.load_string("p.merge_ages(p)");
    let err = session.take_error().expect("aliasing error");
    assert_eq!(err.class_name, "RuntimeError");
    assert_eq!(err.message, "Person instance is already in use");

    session.load_string("p.merge_ages(Person.new(5))");
    assert!(!session.exists_error());
    assert_eq!(session.load_string("p.sum_ages(nil)").as_int(), Some(-1));
}

#[test]
fn test_object_survives_interpreter_function_boundary() {
    let (session, binding) = person_session();
    session.load_string("def mul(a, b)\n  a.greeting * b\nend");
    let expected = "My name is bob and I am 35 years old.".repeat(3);

    let from_script = session.load_string("mul(Person.new('bob', 35), 3)");
    assert_eq!(session.to_string(&from_script), expected);

    let bob = session
        .new_instance(&binding, ("bob", 35))
        .expect("Person.new");
    assert_eq!(session.call::<String, _>("mul", (bob.clone(), 3)), Some(expected));
    assert_eq!(
        session.call_on::<String, _>(&bob.value(), "greeting_n_times", (3,)),
        session.call::<String, _>("mul", (bob, 3))
    );
}

#[test]
fn test_host_sees_script_mutations() {
    let (session, binding) = person_session();

    let ann = session.new_instance(&binding, ("ann", 29)).expect("Person.new");
    session.load_string("def celebrate(p)\n  p.birthday\n  p.birthday\n  p.age\nend");

    assert_eq!(session.call::<i32, _>("celebrate", (ann.clone(),)), Some(31));
    assert_eq!(ann.with(|p| p.age), Some(31));
}

#[test]
fn test_get_data_checks_the_tag() {
    let (session, _) = person_session();

    let obj = session.load_string("Person.new('carl', 50)");
    let person = session.get_data::<Person>(&obj).expect("a Person");
    assert_eq!(person.with(|p| p.name.clone()).as_deref(), Some("carl"));

    let other = session.load_string("'carl'");
    assert!(session.get_data::<Person>(&other).is_none());
    assert!(!session.exists_error());
}

#[test]
fn test_each_array_of_host_objects() {
    let (session, _) = person_session();

    let people = session.load_string("[Person.new('a', 1), Person.new('b', 2), nil]");
    let mut names = Vec::new();
    session.each_array::<Obj<Person>>(&people, |p| {
        names.push(p.with(|p| p.name.clone()).unwrap_or_default());
    });

    assert_eq!(names, vec!["a", "b", ""]);
}

#[test]
fn test_wrapped_host_value_is_usable_from_script() {
    let (session, _) = person_session();
    session.load_string("def describe(p)\n  \"#{p.name} (#{p.age})\"\nend");

    let dora = session
        .wrap(Person {
            name: "dora".into(),
            age: 61,
        })
        .expect("Person is bound");

    assert_eq!(
        session.call::<String, _>("describe", (dora,)).as_deref(),
        Some("dora (61)")
    );
}

#[test]
fn test_script_subclass_inherits_host_methods() {
    let (session, _) = person_session();
    session.load_string(
        "class Student < Person\n  def intro\n    greeting + ' I study.'\n  end\nend",
    );

    let intro = session.load_string("Student.new('eve', 20).intro");

    assert_eq!(
        session.to_string(&intro),
        "My name is eve and I am 20 years old. I study."
    );
}

#[test]
fn test_constructor_type_mismatch_is_reported() {
    let (session, _) = person_session();

    session.load_string("Person.new(35, 'bob')");

    let err = session.take_error().expect("type error");
    assert_eq!(err.class_name, "TypeError");
    assert_eq!(err.message, "no implicit conversion of Integer into String");
}

struct Tracked(Rc<Cell<u32>>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn test_interpreter_releases_instances_exactly_once() {
    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    let drops = Rc::new(Cell::new(0));
    let counter = Rc::clone(&drops);
    session
        .install_class::<Tracked>("Tracked", None)
        .expect("install")
        .definer(&session)
        .constructor(move || Tracked(Rc::clone(&counter)));

    session.load_string("a = Tracked.new\nb = a\nTracked.new");
    assert_eq!(drops.get(), 1);

    session.load_string("a = nil");
    assert_eq!(drops.get(), 1);
    session.load_string("b = nil");
    assert_eq!(drops.get(), 2);

    drop(session);
    assert_eq!(drops.get(), 2);
}

#[test]
fn test_superclass_binding() {
    struct Animal;
    struct Dog;

    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    let animal = session
        .install_class::<Animal>("Animal", None)
        .expect("install Animal")
        .definer(&session)
        .constructor(|| Animal)
        .method("legs", |_: &mut Animal| 4)
        .finish();
    session
        .install_class::<Dog>("Dog", Some(animal.class()))
        .expect("install Dog")
        .definer(&session)
        .constructor(|| Dog)
        .method("sound", |_: &mut Dog| "woof");

    assert!(session.load_string("Dog.new.is_a?(Animal)").truthy());
    let sound = session.load_string("Dog.new.sound");
    assert_eq!(session.to_string(&sound), "woof");

    // inherited host methods still check the receiver's tag
    session.load_string("Dog.new.legs");
    let err = session.take_error().expect("type error");
    assert_eq!(err.message, "wrong argument type Dog (expected Animal)");
}

#[test]
fn test_new_instance_with_host_initializer() {
    #[derive(Default)]
    struct Settings {
        retries: i64,
    }

    let session = Session::builder()
        .stdout(std::io::sink())
        .stderr(std::io::sink())
        .build();
    let binding = session
        .install_class::<Settings>("Settings", None)
        .expect("install Settings")
        .definer(&session)
        .constructor(Settings::default)
        .method("retries", |s: &mut Settings| s.retries)
        .finish();

    let settings = session
        .new_instance_with(&binding, |s| s.retries = 3)
        .expect("Settings.new");
    assert_eq!(
        session.call_on::<i64, _>(&settings.value(), "retries", ()),
        Some(3)
    );

    let (session, people) = person_session();
    let called = Cell::new(false);
    assert!(session.new_instance_with(&people, |_| called.set(true)).is_none());
    assert!(!called.get());
    let err = session.take_error().expect("arity error");
    assert_eq!(err.class_name, "ArgumentError");
}
