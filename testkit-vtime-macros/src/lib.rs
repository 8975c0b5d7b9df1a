//! Procedural macros for testkit-vtime
//!
//! This crate provides the `#[testkit_vtime::test]` attribute macro, which runs
//! a test body inside an interception scope on a fresh virtual-time scheduler.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_vtime::Scheduler;
//!
//! #[testkit_vtime::test]
//! fn my_test(scheduler: Scheduler) {
//!     scheduler.tick(10).unwrap();
//!     assert_eq!(scheduler.now().as_millis(), 10);
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, FnArg, Ident, ItemFn, Lit, Token, Type,
};

/// Leak policy named in the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leak {
    Ignore,
    Report,
    Fail,
}

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Pass budget for `flush()`
    max_passes: Option<usize>,
    /// Render after every task
    auto_render: bool,
    /// Initial virtual time in milliseconds
    start_time_ms: Option<u64>,
    /// Teardown behaviour for leftover tasks
    leak: Option<Leak>,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let lit: Lit = input.parse()?;

            match (ident.to_string().as_str(), &lit) {
                ("max_passes", Lit::Int(i)) => config.max_passes = Some(i.base10_parse()?),
                ("auto_render", Lit::Bool(b)) => config.auto_render = b.value(),
                ("start_time", Lit::Int(i)) => config.start_time_ms = Some(i.base10_parse()?),
                ("leak", Lit::Str(s)) => {
                    config.leak = Some(match s.value().as_str() {
                        "ignore" => Leak::Ignore,
                        "report" => Leak::Report,
                        "fail" => Leak::Fail,
                        other => {
                            return Err(syn::Error::new(
                                s.span(),
                                format!(
                                    "unknown leak policy: {other}. Use \"ignore\", \"report\" or \"fail\""
                                ),
                            ));
                        }
                    });
                }
                ("max_passes" | "auto_render" | "start_time" | "leak", _) => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unexpected value type for `{ident}`"),
                    ));
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

impl TestConfig {
    fn builder(&self) -> TokenStream2 {
        let mut config = quote! { ::testkit_vtime::SchedulerConfig::new() };
        if let Some(max_passes) = self.max_passes {
            config = quote! { #config.max_passes(#max_passes) };
        }
        if self.auto_render {
            config = quote! { #config.auto_render() };
        }
        if let Some(ms) = self.start_time_ms {
            config = quote! { #config.start_time(::std::time::Duration::from_millis(#ms)) };
        }
        if let Some(leak) = self.leak {
            let policy = match leak {
                Leak::Ignore => quote! { Ignore },
                Leak::Report => quote! { Report },
                Leak::Fail => quote! { Fail },
            };
            config = quote! { #config.leak_policy(::testkit_vtime::LeakPolicy::#policy) };
        }
        config
    }
}

/// How the injected scheduler is passed to the body.
enum Injection {
    None,
    ByValue,
    ByRef,
}

/// Determines if a function parameter is requesting a Scheduler.
fn scheduler_injection(arg: &FnArg) -> Option<Injection> {
    let FnArg::Typed(pat_type) = arg else {
        return None;
    };
    let (ty, injection) = match &*pat_type.ty {
        Type::Reference(reference) => (&*reference.elem, Injection::ByRef),
        ty => (ty, Injection::ByValue),
    };
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .filter(|segment| segment.ident == "Scheduler")
            .map(|_| injection),
        _ => None,
    }
}

/// Test attribute macro for tests on a virtual-time scheduler.
///
/// The body runs inside an interception scope. When it returns, the scope is
/// torn down and leftover tasks are handled per the leak policy.
///
/// # Basic Usage
///
/// ```rust,ignore
/// use testkit_vtime::Scheduler;
///
/// #[testkit_vtime::test]
/// fn test_timer(scheduler: Scheduler) {
///     scheduler.schedule_delayed(50, || ()).unwrap();
///     assert_eq!(scheduler.flush().unwrap().as_millis(), 50);
/// }
/// ```
///
/// `async fn` bodies run on a current-thread Tokio runtime:
///
/// ```rust,ignore
/// #[testkit_vtime::test]
/// async fn test_sleep(scheduler: Scheduler) {
///     let sleep = scheduler.sleep(100).unwrap();
///     scheduler.tick(100).unwrap();
///     sleep.await;
/// }
/// ```
///
/// # Configuration Options
///
/// - `max_passes = 50` - Pass budget for `flush()`
/// - `auto_render = true` - Render after every executed task
/// - `start_time = 1000` - Initial virtual time in milliseconds
/// - `leak = "fail"` - `"ignore"`, `"report"` (default) or `"fail"`
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(&config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: &TestConfig, input: ItemFn) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = input;
    let name = sig.ident.clone();
    let output = sig.output.clone();
    let is_async = sig.asyncness.is_some();

    let injection = match sig.inputs.len() {
        0 => Injection::None,
        1 => scheduler_injection(&sig.inputs[0]).ok_or_else(|| {
            syn::Error::new_spanned(
                &sig.inputs[0],
                "the only supported parameter is `Scheduler` or `&Scheduler`",
            )
        })?,
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.inputs,
                "test function takes at most one `Scheduler` parameter",
            ));
        }
    };

    let inner = format_ident!("__{}_body", name);
    sig.ident = inner.clone();

    let argument = match injection {
        Injection::None => quote! {},
        Injection::ByValue => quote! { ::std::clone::Clone::clone(&__scheduler) },
        Injection::ByRef => quote! { &__scheduler },
    };
    let call = if is_async {
        quote! {
            ::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to create tokio runtime")
                .block_on(#inner(#argument))
        }
    } else {
        quote! { #inner(#argument) }
    };
    let config = config.builder();

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #name() #output {
            #sig #block

            let __scheduler = ::testkit_vtime::Scheduler::with_config(#config);
            let __scope = __scheduler
                .enter_scope()
                .expect("failed to enter interception scope");
            let __output = #call;
            if let ::std::result::Result::Err(error) = __scope.exit() {
                panic!("{}", error);
            }
            __output
        }
    })
}
