// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute macros that wrap a test body with a
//! `tat_test_utils::TestLoggerGuard`.
//!
//! The body sees a `logger: &mut TestLogger` binding. Tests returning
//! `Result` have their `Err` recorded in the log before it is propagated.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{ItemFn, ReturnType, Type, parse_macro_input, spanned::Spanned};

/// Synchronous test with a per-test log file.
///
/// ```rust,ignore
/// #[tat_test_utils::logged_test]
/// fn flushes_on_size() {
///     logger.log("running").unwrap();
/// }
/// ```
#[proc_macro_attribute]
pub fn logged_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(Span::call_site(), "#[logged_test] does not accept arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);
    if let Some(async_token) = &input.sig.asyncness {
        return syn::Error::new(
            async_token.span(),
            "#[logged_test] cannot be applied to async functions; use #[logged_tokio_test]",
        )
        .to_compile_error()
        .into();
    }

    expand(input, quote! { #[::core::prelude::v1::test] }, "logged_test")
}

/// Tokio test with a per-test log file. Arguments are forwarded to
/// `#[tokio::test(...)]`.
#[proc_macro_attribute]
pub fn logged_tokio_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = TokenStream2::from(attr);
    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new(
            input.sig.ident.span(),
            "#[logged_tokio_test] requires an async function",
        )
        .to_compile_error()
        .into();
    }

    let harness = if args.is_empty() {
        quote! { #[::tokio::test] }
    } else {
        quote! { #[::tokio::test( #args )] }
    };
    expand(input, harness, "logged_tokio_test")
}

fn expand(mut input: ItemFn, harness: TokenStream2, macro_name: &str) -> TokenStream {
    input.attrs.retain(|attr| {
        attr.path()
            .get_ident()
            .map(|ident| ident != "logged_test" && ident != "logged_tokio_test")
            .unwrap_or(true)
    });

    let sig = &input.sig;
    if !sig.inputs.is_empty() {
        return syn::Error::new(
            sig.ident.span(),
            format!("#[{}] can only be applied to functions without parameters", macro_name),
        )
        .to_compile_error()
        .into();
    }

    let fn_name = sig.ident.to_string();
    let attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;
    let finish = finish_tokens(&sig.output);

    quote! {
        #harness
        #(#attrs)*
        #vis #sig {
            let mut __guard = ::tat_test_utils::TestLoggerGuard::new(#fn_name)
                .expect("failed to create TestLogger");
            let logger = __guard.logger();
            let _ = &logger;

            let __outcome = #block;
            #finish
        }
    }
    .into()
}

fn finish_tokens(output: &ReturnType) -> TokenStream2 {
    let returns_result = match output {
        ReturnType::Type(_, ty) => is_result(ty),
        ReturnType::Default => false,
    };

    if returns_result {
        quote! {
            match __outcome {
                ::std::result::Result::Ok(value) => {
                    if let Err(e) = __guard.finish_success() {
                        panic!("failed to finalize TestLogger: {}", e);
                    }
                    ::std::result::Result::Ok(value)
                }
                ::std::result::Result::Err(err) => {
                    if let Err(e) = __guard.finish_failure(format!("{}", err)) {
                        eprintln!("failed to finalize TestLogger after error: {}", e);
                    }
                    ::std::result::Result::Err(err)
                }
            }
        }
    } else {
        quote! {
            if let Err(e) = __guard.finish_success() {
                panic!("failed to finalize TestLogger: {}", e);
            }
            __outcome
        }
    }
}

fn is_result(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => {
            path.path.segments.last().map(|seg| seg.ident == "Result").unwrap_or(false)
        }
        _ => false,
    }
}
