//! A tiny reference-counted page pool for unit tests.

use crate::{FrameAlloc, PAGE_BYTES};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPage;

pub struct TestFrames {
    refs: Vec<u32>,
    data: Vec<Box<[u8; PAGE_BYTES]>>,
    free: Vec<u32>,
}

impl TestFrames {
    pub fn new(pages: u32) -> Self {
        Self {
            refs: alloc::vec![0; pages as usize],
            data: (0..pages).map(|_| Box::new([0; PAGE_BYTES])).collect(),
            free: (0..pages).rev().collect(),
        }
    }

    pub fn free(&self) -> usize {
        self.free.len()
    }

    pub fn is_free(&self, page: PhysicalPage) -> bool {
        self.free.contains(&page.number())
    }
}

impl FrameAlloc for TestFrames {
    fn alloc_zeroed(&mut self) -> Option<PhysicalPage> {
        let n = self.free.pop()?;
        self.data[n as usize].fill(0);
        Some(PhysicalPage::new(n))
    }

    fn incref(&mut self, page: PhysicalPage) {
        self.refs[page.index()] += 1;
    }

    fn decref(&mut self, page: PhysicalPage) {
        let r = &mut self.refs[page.index()];
        *r -= 1;
        if *r == 0 {
            self.free.push(page.number());
        }
    }

    fn refcount(&self, page: PhysicalPage) -> u32 {
        self.refs[page.index()]
    }

    fn contents(&self, page: PhysicalPage) -> &[u8] {
        &self.data[page.index()][..]
    }

    fn contents_mut(&mut self, page: PhysicalPage) -> &mut [u8] {
        &mut self.data[page.index()][..]
    }
}
