use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPage;
use kernel_vmem::{FrameAlloc, PAGE_BYTES};
use log::{debug, warn};

/// Contents of a page that was never written.
static ZERO_PAGE: [u8; PAGE_BYTES] = [0; PAGE_BYTES];

#[derive(Default)]
struct FrameInfo {
    refs: u32,
    /// `None` until first written; reads see zeros.
    data: Option<Box<[u8; PAGE_BYTES]>>,
    allocated: bool,
}

/// Reference-counted pool of simulated physical pages.
pub struct FrameTable {
    frames: Vec<FrameInfo>,
    free: Vec<u32>,
}

impl FrameTable {
    /// A pool of `pages` pages, page 0 reserved.
    #[must_use]
    pub fn new(pages: u32) -> Self {
        let mut frames = Vec::new();
        frames.resize_with(pages as usize, FrameInfo::default);
        let free: Vec<u32> = (1..pages).rev().collect();
        debug!("physical page pool: {pages} pages, {} free", free.len());
        Self { frames, free }
    }

    /// Total number of pages, including the reserved one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pages currently on the free list.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Whether `page` is handed out.
    #[must_use]
    pub fn is_allocated(&self, page: PhysicalPage) -> bool {
        self.frames.get(page.index()).is_some_and(|f| f.allocated)
    }

    fn info(&self, page: PhysicalPage) -> Option<&FrameInfo> {
        self.frames.get(page.index()).filter(|f| f.allocated)
    }
}

impl FrameAlloc for FrameTable {
    fn alloc_zeroed(&mut self) -> Option<PhysicalPage> {
        let Some(n) = self.free.pop() else {
            warn!("physical page pool exhausted");
            return None;
        };
        let info = &mut self.frames[n as usize];
        info.allocated = true;
        info.refs = 0;
        info.data = None;
        Some(PhysicalPage::new(n))
    }

    fn incref(&mut self, page: PhysicalPage) {
        if let Some(info) = self.frames.get_mut(page.index()) {
            debug_assert!(info.allocated, "incref on free page {page}");
            info.refs += 1;
        }
    }

    fn decref(&mut self, page: PhysicalPage) {
        let Some(info) = self.frames.get_mut(page.index()) else {
            return;
        };
        debug_assert!(info.refs > 0, "decref underflow on {page}");
        info.refs = info.refs.saturating_sub(1);
        if info.refs == 0 && info.allocated {
            info.allocated = false;
            info.data = None;
            self.free.push(page.number());
        }
    }

    fn refcount(&self, page: PhysicalPage) -> u32 {
        self.info(page).map_or(0, |f| f.refs)
    }

    fn contents(&self, page: PhysicalPage) -> &[u8] {
        match self.info(page).and_then(|f| f.data.as_deref()) {
            Some(data) => data,
            None => &ZERO_PAGE,
        }
    }

    fn contents_mut(&mut self, page: PhysicalPage) -> &mut [u8] {
        let info = &mut self.frames[page.index()];
        info.data.get_or_insert_with(|| Box::new([0; PAGE_BYTES]))
            .as_mut_slice()
    }
}
