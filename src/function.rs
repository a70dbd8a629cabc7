//! Host-callable handles to interpreter functions.

use std::fmt;
use std::marker::PhantomData;

use rbind_vm::Value;

use crate::adapter::ToArgs;
use crate::convert::FromScript;
use crate::session::Session;

/// A named interpreter function, bound to the top-level `self` or to an
/// explicit receiver.
///
/// `A` is the argument tuple and `R` the result type, so
/// `FunctionHandle<'_, i64, (i64, i64)>` calls a two-argument function
/// returning an integer. Handles hold no interpreter state of their own and
/// can be cloned freely.
pub struct FunctionHandle<'s, R, A> {
    session: &'s Session,
    receiver: Option<Value>,
    name: String,
    _signature: PhantomData<fn(A) -> R>,
}

impl<'s, R, A> FunctionHandle<'s, R, A>
where
    R: FromScript,
    A: ToArgs,
{
    pub(crate) fn new(session: &'s Session, receiver: Option<Value>, name: &str) -> Self {
        Self {
            session,
            receiver,
            name: name.to_string(),
            _signature: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The explicit receiver; `None` for top-level functions.
    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_ref()
    }

    /// Box `args`, call the function and unbox its result.
    ///
    /// Returns `None` when the call raised or the result does not convert to
    /// `R`; the exception stays pending on the session either way.
    pub fn call(&self, args: A) -> Option<R> {
        self.session.invoke(self.receiver.as_ref(), &self.name, args)
    }
}

impl<R, A> Clone for FunctionHandle<'_, R, A> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            receiver: self.receiver.clone(),
            name: self.name.clone(),
            _signature: PhantomData,
        }
    }
}

impl<R, A> fmt::Debug for FunctionHandle<'_, R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandle")
            .field("name", &self.name)
            .field("receiver", &self.receiver)
            .finish()
    }
}
