//! # Layout Derive
//!
//! This crate provides a derive macro for encoding structs as packed
//! little-endian byte records.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive `kernel_memory_addresses::ByteLayout` for a struct with **named** fields.
///
/// Fields are encoded in declaration order without padding; every field type
/// must itself implement `ByteLayout`.
///
/// - Skipping a field: `#[layout(skip)]`. Skipped fields take no bytes and
///   decode as `Default::default()`.
///
/// # Example
///
/// ```
/// use kernel_memory_addresses::ByteLayout;
/// use utils_layout_derive::ByteLayout;
///
/// #[derive(ByteLayout, Debug, PartialEq)]
/// struct Header {
///     magic: u32,
///     kind: u16,
///     #[layout(skip)]
///     cached: bool,
/// }
///
/// assert_eq!(Header::SIZE, 6);
/// let mut buf = [0u8; 6];
/// Header { magic: 0x464c_457f, kind: 2, cached: true }.write_le(&mut buf);
/// assert_eq!(buf, [0x7f, b'E', b'L', b'F', 2, 0]);
/// assert_eq!(Header::read_le(&buf), Header { magic: 0x464c_457f, kind: 2, cached: false });
/// ```
#[proc_macro_derive(ByteLayout, attributes(layout))]
pub fn derive_byte_layout(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "ByteLayout only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "ByteLayout does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "ByteLayout can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut sizes = Vec::new();
    let mut writes = Vec::new();
    let mut reads = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let ty = &field.ty;

        if should_skip(&field.attrs) {
            reads.push(quote! {
                #fname: ::core::default::Default::default(),
            });
            continue;
        }

        sizes.push(quote! {
            <#ty as ::kernel_memory_addresses::ByteLayout>::SIZE
        });
        writes.push(quote! {
            ::kernel_memory_addresses::ByteLayout::write_le(&self.#fname, &mut out[offset..]);
            offset += <#ty as ::kernel_memory_addresses::ByteLayout>::SIZE;
        });
        reads.push(quote! {
            #fname: {
                let value = <#ty as ::kernel_memory_addresses::ByteLayout>::read_le(&bytes[offset..]);
                offset += <#ty as ::kernel_memory_addresses::ByteLayout>::SIZE;
                value
            },
        });
    }

    let expanded = quote! {
        impl #impl_generics ::kernel_memory_addresses::ByteLayout for #ident #ty_generics #where_clause {
            const SIZE: usize = 0 #(+ #sizes)*;

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn write_le(&self, out: &mut [u8]) {
                let mut offset = 0usize;
                #(#writes)*
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn read_le(bytes: &[u8]) -> Self {
                let mut offset = 0usize;
                Self {
                    #(#reads)*
                }
            }
        }
    };

    TokenStream::from(expanded)
}

fn should_skip(attrs: &[syn::Attribute]) -> bool {
    let mut skip = false;
    for attr in attrs {
        if !attr.path().is_ident("layout") {
            continue;
        }

        // #[layout(skip)] or #[layout(skip = true)]
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                if meta.input.is_empty() {
                    skip = true;
                } else if let Ok(v) = meta.value()?.parse::<LitBool>()
                    && v.value
                {
                    skip = true;
                }
            }
            Ok(())
        });
    }
    skip
}
