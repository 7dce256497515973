//! `#[derive(BinaryCodec)]` for structs.
//!
//! Fields are written in declaration order using their own `Encode` impls and
//! read back in the same order, so the format is exactly the concatenation of
//! the field encodings. Enums and unions are rejected: every enum that crosses
//! the wire in this crate carries a hand-written tag layout.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Index, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "BinaryCodec can only be derived for structs; write Encode/Decode by hand for enums",
            ));
        }
    };

    let (encode_body, decode_body) = match &data.fields {
        Fields::Named(fields) => {
            let idents: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#idents, out); )*
                },
                quote! {
                    Ok(Self {
                        #( #idents: crate::types::encoding::Decode::decode(input)?, )*
                    })
                },
            )
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<Index> = (0..fields.unnamed.len()).map(Index::from).collect();
            let reads = indices
                .iter()
                .map(|_| quote! { crate::types::encoding::Decode::decode(input)? });
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#indices, out); )*
                },
                quote! { Ok(Self( #( #reads ),* )) },
            )
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    };

    let (out_ident, input_ident) = if data.fields.is_empty() {
        (quote! { _out }, quote! { _input })
    } else {
        (quote! { out }, quote! { input })
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            fn encode<S: crate::types::encoding::EncodeSink>(&self, #out_ident: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            fn decode(
                #input_ident: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}
