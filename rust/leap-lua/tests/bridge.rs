use leap_lua::bridge::{self, BRIDGE_UPVALUES};
use leap_lua::{ffi, LuaError, RegistryIndex, Resolver, State, StateIndex, FunctionIndex};
use std::cell::RefCell;
use std::os::raw::c_int;

thread_local! {
    static SEEN: RefCell<Vec<(u32, u32)>> = const { RefCell::new(Vec::new()) };
}

fn index(raw: u32) -> RegistryIndex {
    RegistryIndex::new(raw).expect("nonzero index")
}

fn seen() -> Vec<(u32, u32)> {
    SEEN.with(|seen| seen.borrow().clone())
}

/// Records every (state, function) pair and pushes `state * 10 + function`.
struct Recording;

impl Resolver for Recording {
    fn resolve(
        l: *mut ffi::lua_State,
        state: StateIndex,
        function: FunctionIndex,
    ) -> Result<c_int, LuaError> {
        SEEN.with(|seen| seen.borrow_mut().push((state.get(), function.get())));
        unsafe { ffi::lua_pushinteger(l, i64::from(state.get() * 10 + function.get())) };
        Ok(1)
    }
}

/// Returns the function index as the result count, pushing that many values.
struct CountFromIndex;

impl Resolver for CountFromIndex {
    fn resolve(
        l: *mut ffi::lua_State,
        _state: StateIndex,
        function: FunctionIndex,
    ) -> Result<c_int, LuaError> {
        let count = function.get() as c_int;
        for n in 0..count {
            unsafe { ffi::lua_pushinteger(l, i64::from(n)) };
        }
        Ok(count)
    }
}

struct Failing;

impl Resolver for Failing {
    fn resolve(_: *mut ffi::lua_State, _: StateIndex, _: FunctionIndex) -> Result<c_int, LuaError> {
        Err(LuaError::runtime("resolver refused"))
    }
}

struct Panicking;

impl Resolver for Panicking {
    fn resolve(_: *mut ffi::lua_State, _: StateIndex, _: FunctionIndex) -> Result<c_int, LuaError> {
        panic!("resolver exploded")
    }
}

fn install<R: Resolver>(state: &State, name: &str, s: u32, f: u32) {
    unsafe {
        bridge::push_indices(state.as_ptr(), index(s), index(f));
        bridge::push_closure_with::<R>(state.as_ptr(), BRIDGE_UPVALUES);
    }
    state.set_global(name).unwrap();
}

fn global_integer(state: &State, name: &str) -> Option<i64> {
    state.get_global(name).unwrap();
    let value = state.to_integer(-1);
    state.pop(1);
    value
}

#[test]
fn push_closure_consumes_upvalues_and_leaves_one_closure() {
    let state = State::new().unwrap();
    unsafe {
        bridge::push_indices(state.as_ptr(), index(3), index(7));
        bridge::push_closure_with::<Recording>(state.as_ptr(), BRIDGE_UPVALUES);
    }
    assert_eq!(state.top(), 1);
    assert!(state.is_function(-1));
    assert!(state.is_host_function(-1));
}

#[test]
fn closure_always_resolves_to_bound_indices() {
    let state = State::new().unwrap();
    state.open_libs();
    install::<Recording>(&state, "probe", 3, 7);

    state
        .do_string("a = probe() b = probe(1, 'x', {}) c = probe(nil, nil, nil)")
        .unwrap();

    assert_eq!(global_integer(&state, "a"), Some(37));
    assert_eq!(global_integer(&state, "b"), Some(37));
    assert_eq!(global_integer(&state, "c"), Some(37));
    assert_eq!(seen(), vec![(3, 7), (3, 7), (3, 7)]);
}

#[test]
fn separate_closures_keep_separate_bindings() {
    let state = State::new().unwrap();
    install::<Recording>(&state, "first", 1, 2);
    install::<Recording>(&state, "second", 4, 5);

    state.do_string("x = first() y = second() z = first()").unwrap();

    assert_eq!(global_integer(&state, "x"), Some(12));
    assert_eq!(global_integer(&state, "y"), Some(45));
    assert_eq!(global_integer(&state, "z"), Some(12));
}

#[test]
fn trampoline_returns_resolver_count_verbatim() {
    let state = State::new().unwrap();
    state.open_libs();
    install::<CountFromIndex>(&state, "three", 1, 3);
    install::<CountFromIndex>(&state, "one", 1, 1);

    state
        .do_string("n3 = select('#', three()) n1 = select('#', one())")
        .unwrap();

    assert_eq!(global_integer(&state, "n3"), Some(3));
    assert_eq!(global_integer(&state, "n1"), Some(1));
}

#[test]
fn resolver_errors_are_catchable_by_scripts() {
    let state = State::new().unwrap();
    state.open_libs();
    install::<Failing>(&state, "refuse", 1, 1);

    state
        .do_string(
            r#"
            local ok, err = pcall(refuse)
            assert(not ok)
            assert(err == "resolver refused", err)
            "#,
        )
        .unwrap();
}

#[test]
fn resolver_panics_do_not_cross_into_the_interpreter() {
    let state = State::new().unwrap();
    install::<Panicking>(&state, "explode", 1, 1);

    let err = state.do_string("explode()").unwrap_err();
    match err {
        LuaError::Runtime(message) => assert!(message.contains("resolver exploded"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn non_integer_upvalues_are_rejected() {
    let state = State::new().unwrap();
    unsafe {
        ffi::lua_pushnumber(state.as_ptr(), 3.5);
        ffi::lua_pushinteger(state.as_ptr(), 7);
        bridge::push_closure_with::<Recording>(state.as_ptr(), BRIDGE_UPVALUES);
    }
    state.set_global("broken").unwrap();

    let err = state.do_string("broken()").unwrap_err();
    assert!(err.to_string().contains("upvalue 1"), "{err}");
    assert!(seen().is_empty());
}

#[test]
fn out_of_range_upvalues_are_rejected() {
    let state = State::new().unwrap();
    unsafe {
        ffi::lua_pushinteger(state.as_ptr(), 3);
        ffi::lua_pushinteger(state.as_ptr(), -7);
        bridge::push_closure_with::<Recording>(state.as_ptr(), BRIDGE_UPVALUES);
    }
    state.set_global("broken").unwrap();

    let err = state.do_string("broken()").unwrap_err();
    assert!(err.to_string().contains("upvalue 2"), "{err}");
}

#[test]
fn default_resolver_rejects_unknown_indices() {
    let state = State::new().unwrap();
    unsafe {
        bridge::push_indices(state.as_ptr(), state.index(), index(u32::MAX));
        bridge::push_closure(state.as_ptr(), BRIDGE_UPVALUES);
    }
    state.set_global("dangling").unwrap();

    let err = state.do_string("dangling()").unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}

#[test]
fn fatal_handler_returns_sentinel_and_records_fault() {
    let state = State::new().unwrap();
    state.push_string("boom");

    let handler = state.fatal_handler();
    let result = unsafe { handler(state.as_ptr()) };

    assert_eq!(result, 0);
    assert_eq!(state.instance().fault_count(), 1);
    assert_eq!(state.instance().last_fault().as_deref(), Some("boom"));
    // The handler only reads: the error value is still there.
    assert_eq!(state.top(), 1);
}

#[test]
fn fatal_handler_tolerates_non_string_errors() {
    let state = State::new().unwrap();
    state.new_table();

    let result = unsafe { bridge::fatal_error_handler(state.as_ptr()) };

    assert_eq!(result, 0);
    assert_eq!(
        state.instance().last_fault().as_deref(),
        Some("error object is not a string")
    );
}

#[test]
fn fatal_handler_on_empty_stack() {
    let state = State::new().unwrap();

    let result = unsafe { bridge::fatal_error_handler(state.as_ptr()) };

    assert_eq!(result, 0);
    assert_eq!(
        state.instance().last_fault().as_deref(),
        Some("no error available on stack")
    );
}

#[test]
fn each_state_has_its_own_fault_record() {
    let a = State::with_label("a").unwrap();
    let b = State::with_label("b").unwrap();
    a.push_string("only a");

    unsafe { (a.fatal_handler())(a.as_ptr()) };

    assert_eq!(a.instance().fault_count(), 1);
    assert_eq!(b.instance().fault_count(), 0);
    assert_ne!(a.index(), b.index());
}

unsafe extern "C-unwind" fn placeholder_panic(_: *mut ffi::lua_State) -> c_int {
    0
}

#[test]
fn new_state_installs_the_fatal_handler() {
    let state = State::new().unwrap();
    let l = state.as_ptr();

    // `lua_atpanic` hands back the handler it replaces.
    let installed = unsafe { ffi::lua_atpanic(l, placeholder_panic) };
    let replaced = unsafe { ffi::lua_atpanic(l, installed) };

    assert_eq!(installed as usize, bridge::fatal_error_handler as usize);
    assert_eq!(state.fatal_handler() as usize, installed as usize);
    assert_eq!(replaced as usize, placeholder_panic as usize);
}
