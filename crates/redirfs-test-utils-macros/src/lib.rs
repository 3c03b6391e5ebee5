// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `#[logged_test]`: wraps a test body in a `redirfs_test_utils::TestLoggerGuard`
//! and binds `logger: &mut TestLogger` for the body to write to.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, ItemFn, ReturnType, Type};

#[proc_macro_attribute]
pub fn logged_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(Span::call_site(), "#[logged_test] takes no arguments")
            .to_compile_error()
            .into();
    }
    let mut input = parse_macro_input!(item as ItemFn);

    if let Some(asyncness) = &input.sig.asyncness {
        return syn::Error::new(asyncness.span(), "#[logged_test] does not support async functions")
            .to_compile_error()
            .into();
    }
    if !input.sig.inputs.is_empty() {
        return syn::Error::new(input.sig.ident.span(), "#[logged_test] functions take no parameters")
            .to_compile_error()
            .into();
    }

    input.attrs.retain(|attr| !attr.path().is_ident("logged_test"));
    let fn_ident = &input.sig.ident;
    let fn_name = fn_ident.to_string();
    let vis = &input.vis;
    let generics = &input.sig.generics;
    let output = &input.sig.output;
    let block = &input.block;
    let attrs = &input.attrs;
    let finish = finish_body(output);

    quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #fn_ident #generics () #output {
            let mut __guard = ::redirfs_test_utils::TestLoggerGuard::new(#fn_name)
                .expect("failed to create test logger");
            let logger = __guard.logger();
            let _ = &logger;
            let __result = #block;
            #finish
        }
    }
    .into()
}

fn returns_result(output: &ReturnType) -> Option<bool> {
    match output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => Some(match ty.as_ref() {
            Type::Path(path) => path.path.segments.last().is_some_and(|seg| seg.ident == "Result"),
            _ => false,
        }),
    }
}

fn finish_body(output: &ReturnType) -> TokenStream2 {
    match returns_result(output) {
        Some(true) => quote! {
            match __result {
                ::std::result::Result::Ok(value) => {
                    if let Err(e) = __guard.finish_success() {
                        panic!("failed to finalize test logger: {}", e);
                    }
                    ::std::result::Result::Ok(value)
                }
                ::std::result::Result::Err(err) => {
                    if let Err(e) = __guard.finish_failure(format!("{}", err)) {
                        eprintln!("failed to finalize test logger: {}", e);
                    }
                    ::std::result::Result::Err(err)
                }
            }
        },
        Some(false) => quote! {
            if let Err(e) = __guard.finish_success() {
                panic!("failed to finalize test logger: {}", e);
            }
            __result
        },
        None => quote! {
            let () = __result;
            if let Err(e) = __guard.finish_success() {
                panic!("failed to finalize test logger: {}", e);
            }
        },
    }
}
