use kernel_env::{Kernel, KernelError};

/// Random access to the bytes of an executable.
pub trait ImageSource {
    /// Length of the image in bytes.
    fn size(&self) -> u32;

    /// Fill `buf` with the bytes at `offset`.
    ///
    /// # Errors
    /// - [`KernelError::InvalidImage`] if the range lies outside the image
    ///   or its backing store is missing.
    fn read_at(&self, kernel: &Kernel, offset: u32, buf: &mut [u8]) -> Result<(), KernelError>;
}

impl ImageSource for [u8] {
    #[allow(clippy::cast_possible_truncation)]
    fn size(&self) -> u32 {
        self.len().min(u32::MAX as usize) as u32
    }

    fn read_at(&self, _kernel: &Kernel, offset: u32, buf: &mut [u8]) -> Result<(), KernelError> {
        let start = offset as usize;
        let bytes = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or(KernelError::InvalidImage)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}
