//! `#[derive(Error)]`: `Display` and `std::error::Error` for error types.
//!
//! ```ignore
//! use chainvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("unknown context {name}")]
//!     UnknownContext { name: String },
//!     #[error("bad tag {0:#04x}")]
//!     BadTag(u8),
//!     #[error("stack underflow")]
//!     Underflow,
//! }
//! ```
//!
//! Only the fields named in the message are bound, so a variant may carry
//! fields that are not part of its rendered text.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let message = message_of(&variant.attrs, &variant.ident)?;
                    let variant_name = &variant.ident;
                    let (pattern, format) = bind_fields(&variant.fields, &message);
                    Ok(quote! { Self::#variant_name #pattern => #format, })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #( #arms )*
                }
            }
        }
        Data::Struct(data) => {
            let message = message_of(&input.attrs, name)?;
            let (pattern, format) = bind_fields(&data.fields, &message);
            quote! {
                let Self #pattern = self;
                #format
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                name,
                "Error cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Reads the string literal out of `#[error("...")]`.
fn message_of(attrs: &[Attribute], target: &Ident) -> syn::Result<LitStr> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(
                target,
                format!("`{target}` needs an #[error(\"...\")] message"),
            )
        })?;
    attr.parse_args::<LitStr>()
}

/// Builds the destructuring pattern and the `write!` call for one set of fields.
///
/// Positional placeholders (`{0}`) are rewritten to named ones (`{f0}`) so both
/// field styles share the same formatting path.
fn bind_fields(fields: &Fields, message: &LitStr) -> (TokenStream2, TokenStream2) {
    let text = message.value();
    match fields {
        Fields::Unit => (quote! {}, quote! { f.write_str(#message) }),
        Fields::Named(named) => {
            let used: Vec<&Ident> = named
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| placeholders(&text).contains(&ident.to_string()))
                .collect();
            (
                quote! { { #( #used, )* .. } },
                quote! { write!(f, #message, #( #used = #used ),*) },
            )
        }
        Fields::Unnamed(unnamed) => {
            let mut rewritten = text.clone();
            for index in (0..unnamed.unnamed.len()).rev() {
                rewritten = rewritten
                    .replace(&format!("{{{index}}}"), &format!("{{f{index}}}"))
                    .replace(&format!("{{{index}:"), &format!("{{f{index}:"));
            }
            let names = placeholders(&rewritten);
            let mut slots = Vec::new();
            let mut used = Vec::new();
            for index in 0..unnamed.unnamed.len() {
                let ident = format_ident!("f{}", index);
                if names.contains(&ident.to_string()) {
                    slots.push(quote! { #ident });
                    used.push(ident);
                } else {
                    slots.push(quote! { _ });
                }
            }
            let literal = LitStr::new(&rewritten, Span::call_site());
            (
                quote! { ( #( #slots ),* ) },
                quote! { write!(f, #literal, #( #used = #used ),*) },
            )
        }
    }
}

/// Names referenced by `{name}` or `{name:spec}` placeholders, skipping `{{` escapes.
fn placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next == '}' || next == ':' {
                break;
            }
            name.push(next);
            chars.next();
        }
        if !name.is_empty() {
            names.push(name);
        }
    }
    names
}
