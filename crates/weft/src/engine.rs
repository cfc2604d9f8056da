use std::collections::VecDeque;
use std::slice;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use weft_codegen::{
    Hook, JIT_PAGE_ALIGN, JIT_PAGE_SIZE, JitPage, SUPPORTED, epilogue, os_page_size, prologue,
};

/// Bytes reserved by [`Jit::start`] for a typical threaded function.
const START_RESERVE: usize = 4096;

/// Gap between the end of the host image and the first mapping, to stay
/// clear of a heap grown via the program break.
const IMAGE_GAP: usize = 1 << 20;

/// Half the AArch64 branch budget in bytes. Mappings farther than this
/// from the host image force the register-indirect branch forms.
const FAR_THRESHOLD: u64 = ((weft_codegen::aarch64::DISP_MAX << 2) / 2) as u64;

struct Pool {
    pages: VecDeque<Box<JitPage>>,
    /// Next mapping hint; zero until the first acquire computes it.
    brk: usize,
}

/// The threading engine: a pool of executable pages shared by any
/// number of writer threads.
///
/// Writers take a page with [`Jit::acquire`] or [`Jit::start`], emit
/// into it while it is exclusively theirs, and hand it back with
/// [`Jit::release`] / [`Jit::finish`] / [`Jit::abandon`]. The engine
/// lock covers only the pool and the placement hint; emission, page
/// protection changes and hook publication all happen outside it.
///
/// Dropping the engine unmaps every pooled page. Pages still held by
/// writers own their mappings and clean up on their own.
pub struct Jit {
    disabled: AtomicBool,
    pool: Mutex<Pool>,
    /// Locator for the end of the host image. Replaceable so embedders
    /// can provide the linker's own symbol and tests can inject stubs.
    image_end: fn() -> usize,
}

fn default_image_end() -> usize {
    // Our own text section stands in for the linker's end-of-image
    // symbol; it sits inside the image, which is all the placement
    // heuristic needs.
    default_image_end as usize
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

impl Jit {
    pub fn new() -> Self {
        Self::with_image_end(default_image_end)
    }

    /// Creates an engine that places mappings relative to the address
    /// reported by `image_end`.
    pub fn with_image_end(image_end: fn() -> usize) -> Self {
        Jit {
            // Without a back-end for the host ISA the engine is
            // permanently off.
            disabled: AtomicBool::new(!SUPPORTED),
            pool: Mutex::new(Pool {
                pages: VecDeque::new(),
                brk: 0,
            }),
            image_end,
        }
    }

    /// Turns the engine off for good. Acquires fail from here on;
    /// writers holding pages are unaffected and their releases still
    /// commit what they can.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    /// True once [`Jit::disable`] was called or a mapping failed.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Takes a page with at least `reserve` bytes of room out of the
    /// pool, mapping a new one if the head page is too full.
    ///
    /// The returned page is owned by the calling thread until it comes
    /// back through release or abandon. Returns `None` when the engine
    /// is disabled, and disables it first when the kernel refuses to
    /// provide memory.
    pub fn acquire(&self, reserve: usize) -> Option<Box<JitPage>> {
        assert!(reserve > 0 && reserve <= JIT_PAGE_SIZE, "unreasonable jit reservation");
        let mut pool = self.pool.lock();
        if self.is_disabled() {
            return None;
        }
        if pool.brk == 0 {
            // Politely ask the kernel for addresses starting a bit past
            // the end of our own image: far enough to miss a brk-based
            // malloc heap, close enough that the ISA displacement
            // limits keep direct branches viable.
            pool.brk = align_up((self.image_end)(), JIT_PAGE_SIZE) + IMAGE_GAP;
        }
        let reusable = pool
            .pages
            .front()
            .is_some_and(|jp| jp.index() + reserve <= JIT_PAGE_SIZE);
        let jp = if reusable {
            pool.pages.pop_front()
        } else {
            self.map_fresh(&mut pool)
        };
        drop(pool);
        if let Some(jp) = &jp {
            debug_assert_eq!(jp.start(), jp.index());
            debug_assert_eq!(jp.start() % JIT_PAGE_ALIGN, 0);
        }
        jp
    }

    fn map_fresh(&self, pool: &mut Pool) -> Option<Box<JitPage>> {
        loop {
            match JitPage::map(pool.brk as *mut u8) {
                Ok(jp) => {
                    let distance =
                        (jp.base() as i64 - (self.image_end)() as i64).unsigned_abs();
                    if distance > FAR_THRESHOLD {
                        static FAR: Once = Once::new();
                        FAR.call_once(|| {
                            warn!(
                                "mmap() returned suboptimal address {:#x} that is {distance} bytes away from the program image",
                                jp.base()
                            );
                        });
                    }
                    debug!("mapped jit page at {:#x}", jp.base());
                    pool.brk = jp.base() + JIT_PAGE_SIZE;
                    return Some(jp);
                }
                Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
                    // Someone already lives at the hint; slide forward.
                    pool.brk += JIT_PAGE_SIZE;
                }
                Err(err) => {
                    warn!("jit mmap() at {:#x} failed: {err}", pool.brk);
                    self.disable();
                    return None;
                }
            }
        }
    }

    /// Finishes the chunk written since the page was acquired and hands
    /// the page back to the pool.
    ///
    /// When a `hook` is supplied it immediately receives `staging` (a
    /// safe transitional entry point, typically the interpreter) and is
    /// queued to receive the chunk's address once its bytes become
    /// executable. Returns the chunk's address, or `None` if nothing
    /// was written or an append overflowed.
    pub fn release(
        &self,
        mut jp: Box<JitPage>,
        hook: Option<Arc<Hook>>,
        staging: usize,
    ) -> Option<usize> {
        let addr = jp.release_chunk(hook, staging, os_page_size());
        self.reinsert(jp);
        addr
    }

    /// Hands a page back without keeping anything written since
    /// acquire. Nothing is committed or published.
    pub fn abandon(&self, mut jp: Box<JitPage>) {
        jp.rewind();
        self.reinsert(jp);
    }

    /// Begins a threaded function: acquires a page and emits the
    /// prologue.
    pub fn start(&self) -> Option<Box<JitPage>> {
        let mut jp = self.acquire(START_RESERVE)?;
        jp.append(prologue());
        Some(jp)
    }

    /// Completes a threaded function: emits the epilogue and releases.
    /// Append failures anywhere in the chunk surface here as `None`.
    pub fn finish(
        &self,
        mut jp: Box<JitPage>,
        hook: Option<Arc<Hook>>,
        staging: usize,
    ) -> Option<usize> {
        jp.append(epilogue());
        self.release(jp, hook, staging)
    }

    /// Completes a threaded function by tail-jumping into the body of a
    /// previously finished `chunk`, past its prologue, so the two share
    /// a single frame. With no chunk this is exactly [`Jit::finish`].
    ///
    /// Splicing an address that did not come from [`Jit::start`] is
    /// undefined.
    pub fn splice(
        &self,
        mut jp: Box<JitPage>,
        hook: Option<Arc<Hook>>,
        staging: usize,
        chunk: Option<usize>,
    ) -> Option<usize> {
        let Some(chunk) = chunk else {
            return self.finish(jp, hook, staging);
        };
        debug_assert_eq!(
            unsafe { slice::from_raw_parts(chunk as *const u8, prologue().len()) },
            prologue(),
            "spliced chunk does not begin with the canonical prologue"
        );
        jp.jmp(chunk + prologue().len());
        self.release(jp, hook, staging)
    }

    /// Forces pending hook publications out by committing through the
    /// last staged chunk of every pooled page. Returns the number of
    /// hooks published.
    pub fn flush(&self) -> usize {
        let pagesize = os_page_size();
        let mut count = 0;
        let mut pool = self.pool.lock();
        'scan: loop {
            for i in 0..pool.pages.len() {
                let jp = &pool.pages[i];
                if jp.start() >= JIT_PAGE_SIZE {
                    // Full pages sort to the back; nothing further to do.
                    break;
                }
                if !jp.has_staged() {
                    continue;
                }
                let Some(mut jp) = pool.pages.remove(i) else {
                    break;
                };
                drop(pool);
                count += jp.force_commit(pagesize);
                pool = self.pool.lock();
                insert(&mut pool, jp);
                continue 'scan;
            }
            break;
        }
        count
    }

    fn reinsert(&self, jp: Box<JitPage>) {
        debug_assert_eq!(jp.start(), jp.index());
        let mut pool = self.pool.lock();
        insert(&mut pool, jp);
    }
}

/// Pages with room stay at the front so acquisition reuses them before
/// mapping anything new; full pages sink to the back.
fn insert(pool: &mut Pool, jp: Box<JitPage>) {
    if jp.index() < JIT_PAGE_SIZE {
        pool.pages.push_front(jp);
    } else {
        pool.pages.push_back(jp);
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
