use weft::{Jit, SUPPORTED};

#[test]
fn unsupported_hosts_stay_disabled() {
    if SUPPORTED {
        return;
    }
    let jit = Jit::new();
    assert!(jit.is_disabled());
    assert!(jit.start().is_none());
    assert!(jit.acquire(64).is_none());
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod native {
    use std::collections::HashSet;
    use std::slice;
    use std::sync::Arc;
    use std::thread;

    use weft::{Hook, Jit, prologue};

    #[derive(Default)]
    struct State {
        acc: u64,
        trace: Vec<u32>,
    }

    extern "C" fn op_add(state: *mut State, amount: u64) {
        let state = unsafe { &mut *state };
        state.acc += amount;
        state.trace.push(1);
    }

    extern "C" fn op_double(state: *mut State) {
        let state = unsafe { &mut *state };
        state.acc *= 2;
        state.trace.push(2);
    }

    extern "C" fn interpret(_state: *mut State) {}

    type Threaded = unsafe extern "C" fn(*mut State);

    unsafe fn enter(addr: usize, state: &mut State) {
        let f: Threaded = unsafe { std::mem::transmute(addr) };
        unsafe { f(state as *mut State) };
    }

    #[test]
    fn threads_two_calls_through_a_hook() -> Result<(), anyhow::Error> {
        let jit = Jit::new();
        let hook = Arc::new(Hook::new(interpret as usize));
        let mut jp = jit
            .start()
            .ok_or_else(|| anyhow::anyhow!("no jit page available"))?;
        assert!(jp.set_arg(1, 42));
        assert!(jp.call(op_add as usize));
        assert!(jp.call(op_double as usize));
        let addr = jit
            .finish(jp, Some(hook.clone()), interpret as usize)
            .ok_or_else(|| anyhow::anyhow!("finish failed"))?;

        // Until a commit catches up, readers see the fallback.
        assert_eq!(hook.get(), interpret as usize);
        assert_eq!(jit.flush(), 1);
        assert_eq!(hook.get(), addr);

        let mut state = State::default();
        unsafe { enter(hook.get(), &mut state) };
        assert_eq!(state.acc, 84);
        assert_eq!(state.trace, [1, 2]);
        Ok(())
    }

    #[test]
    fn splice_reuses_the_other_chunks_body() -> Result<(), anyhow::Error> {
        let jit = Jit::new();
        let fallback = interpret as usize;
        let hook_a = Arc::new(Hook::new(fallback));
        let mut a = jit
            .start()
            .ok_or_else(|| anyhow::anyhow!("no jit page available"))?;
        assert!(a.call(op_double as usize));
        let chunk_a = jit
            .finish(a, Some(hook_a.clone()), fallback)
            .ok_or_else(|| anyhow::anyhow!("finish failed"))?;

        let hook_b = Arc::new(Hook::new(fallback));
        let mut b = jit
            .start()
            .ok_or_else(|| anyhow::anyhow!("no jit page available"))?;
        assert!(b.set_arg(1, 5));
        assert!(b.call(op_add as usize));
        let chunk_b = jit
            .splice(b, Some(hook_b.clone()), fallback, Some(chunk_a))
            .ok_or_else(|| anyhow::anyhow!("splice failed"))?;
        assert_eq!(jit.flush(), 2);
        assert_eq!(hook_a.get(), chunk_a);
        assert_eq!(hook_b.get(), chunk_b);

        // Entering B runs op_add then falls through into A's body,
        // sharing B's frame, with the same visible effect as a direct
        // call chain.
        let mut state = State::default();
        unsafe { enter(chunk_b, &mut state) };
        assert_eq!(state.acc, 10);
        assert_eq!(state.trace, [1, 2]);

        // A is still independently callable.
        let mut state = State::default();
        unsafe { enter(chunk_a, &mut state) };
        assert_eq!(state.acc, 0);
        assert_eq!(state.trace, [2]);
        Ok(())
    }

    #[test]
    fn every_release_eventually_publishes_one_hook() {
        let jit = Jit::new();
        let mut hooks = Vec::new();
        let mut released = 0;
        for _ in 0..600 {
            let Some(mut jp) = jit.start() else { break };
            // Pad each chunk to roughly 200 bytes so the run spans
            // several regions.
            assert!(jp.append(&[0xcc; 180]));
            let hook = Arc::new(Hook::new(0));
            if jit.finish(jp, Some(hook.clone()), 0).is_some() {
                released += 1;
                hooks.push(hook);
            }
        }
        assert_eq!(released, 600);
        jit.flush();
        let published: Vec<usize> = hooks.iter().map(|h| h.get()).filter(|&a| a != 0).collect();
        assert_eq!(published.len(), released);
        let distinct: HashSet<usize> = published.iter().copied().collect();
        assert_eq!(distinct.len(), released);
    }

    #[test]
    fn disable_still_lets_inflight_writers_release() {
        let jit = Jit::new();
        let mut jp = jit.start().unwrap();
        assert!(jp.call(op_double as usize));
        jit.disable();
        assert!(jit.start().is_none());
        assert!(jit.acquire(64).is_none());

        let hook = Arc::new(Hook::new(0));
        let addr = jit.finish(jp, Some(hook.clone()), 0).unwrap();
        assert_eq!(jit.flush(), 1);
        assert_eq!(hook.get(), addr);
    }

    #[test]
    fn concurrent_writers_publish_distinct_executable_hooks() {
        let jit = Arc::new(Jit::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let jit = Arc::clone(&jit);
            handles.push(thread::spawn(move || {
                let mut hooks = Vec::new();
                for _ in 0..50 {
                    let Some(mut jp) = jit.start() else { break };
                    assert!(jp.call(op_double as usize));
                    let hook = Arc::new(Hook::new(0));
                    if jit.finish(jp, Some(hook.clone()), 0).is_some() {
                        hooks.push(hook);
                    }
                }
                hooks
            }));
        }
        let hooks: Vec<Arc<Hook>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(hooks.len(), 200);
        jit.flush();

        let addrs: HashSet<usize> = hooks.iter().map(|h| h.get()).collect();
        assert!(!addrs.contains(&0));
        assert_eq!(addrs.len(), hooks.len());

        // Every published chunk begins with the canonical prologue and
        // actually runs.
        for hook in &hooks {
            let head = unsafe { slice::from_raw_parts(hook.get() as *const u8, prologue().len()) };
            assert_eq!(head, prologue());
        }
        let mut state = State::default();
        unsafe { enter(hooks[0].get(), &mut state) };
        assert_eq!(state.trace, [2]);
    }
}
