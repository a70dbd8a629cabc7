use std::rc::Rc;

use crate::class::Aspec;
use crate::state::State;
use crate::value::Value;

pub(super) fn init(state: &mut State) {
    let exception = Rc::clone(&state.builtins.exception);
    let e = &exception;
    state.def_builtin(e, "initialize", Aspec::Any, |st, recv, args| {
        if !st.check_arity(args, 0, 1) {
            return Value::Nil;
        }
        let message = args.first().cloned().unwrap_or_default();
        let name = st.syms.message;
        st.ivar_set(recv, name, message);
        Value::Nil
    });
    state.def_builtin(e, "message", Aspec::None, |st, recv, _| Value::string(&st.exc_message(recv)));
    state.def_builtin(e, "to_s", Aspec::None, |st, recv, _| Value::string(&st.exc_message(recv)));
    state.def_builtin(e, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_inspect(recv)));
    state.def_builtin(e, "full_message", Aspec::None, |st, recv, _| {
        let class = st.class_of(recv);
        let message = st.exc_message(recv);
        Value::string(&format!("{message} ({})", class.name()))
    });
}

#[cfg(test)]
mod tests {
    use crate::{State, VmOptions};

    fn state() -> State {
        State::open(VmOptions {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        })
    }

    #[test]
    fn message_defaults_to_class_name() {
        let mut state = state();
        let value = state.load_string("ArgumentError.new.message");
        assert_eq!(value.as_str().map(|s| s.clone()).as_deref(), Some("ArgumentError"));
    }

    #[test]
    fn custom_exception_classes_rescue_by_ancestor() {
        let mut state = state();
        let value = state.load_string(
            "class AppError < StandardError\nend\nbegin\n  raise AppError, 'boom'\nrescue StandardError => e\n  e.class.name + ': ' + e.message\nend",
        );
        assert!(state.exc().is_none(), "{:?}", state.error_string());
        assert_eq!(value.as_str().map(|s| s.clone()).as_deref(), Some("AppError: boom"));
    }

    #[test]
    fn inspect_shows_class_and_message() {
        let mut state = state();
        let value = state.load_string("RuntimeError.new('x').inspect");
        assert_eq!(value.as_str().map(|s| s.clone()).as_deref(), Some("#<RuntimeError: x>"));
    }
}
