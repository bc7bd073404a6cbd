use crate::{PhysicalAddress, VirtualAddress};

/// A record with a fixed little-endian byte encoding.
///
/// Used for anything the kernel reads out of, or writes into, an
/// environment's memory: trap frames, executable headers and file records.
///
/// Both methods expect a slice of at least [`ByteLayout::SIZE`] bytes and
/// panic otherwise; callers size their buffers from `SIZE`.
pub trait ByteLayout: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into the first `SIZE` bytes of `out`.
    fn write_le(&self, out: &mut [u8]);

    /// Decode from the first `SIZE` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! int_layout {
    ($($t:ty),*) => {$(
        impl ByteLayout for $t {
            const SIZE: usize = size_of::<$t>();

            #[inline]
            fn write_le(&self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(raw)
            }
        }
    )*};
}

int_layout!(u8, u16, u32, i32);

impl<T: ByteLayout, const N: usize> ByteLayout for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn write_le(&self, out: &mut [u8]) {
        for (item, chunk) in self.iter().zip(out.chunks_mut(T::SIZE)) {
            item.write_le(chunk);
        }
    }

    fn read_le(bytes: &[u8]) -> Self {
        core::array::from_fn(|i| T::read_le(&bytes[i * T::SIZE..]))
    }
}

impl ByteLayout for VirtualAddress {
    const SIZE: usize = 4;

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        self.0.write_le(out);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        Self(u32::read_le(bytes))
    }
}

impl ByteLayout for PhysicalAddress {
    const SIZE: usize = 4;

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        self.0.write_le(out);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        Self(u32::read_le(bytes))
    }
}
