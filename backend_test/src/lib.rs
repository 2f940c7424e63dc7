use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that any database is dropped regardless of how the test terminates.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::ledger::{Store, VoteLedger, HistoryLog}`, and, for MongoDB tests
/// only, [`mongodb::Database`]. Each may be requested at most once.
///
/// By default the test runs against a fresh in-memory store. With
/// `#[backend_test(mongodb)]` it runs against a fresh MongoDB database, and
/// is ignored unless the `mongodb-tests` feature is enabled.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    let mongodb = match parse_macro_input!(args as Option<Ident>) {
        None => false,
        Some(arg) if arg == "mongodb" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `mongodb`")
                .into_compile_error()
                .into();
        }
    };

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), mongodb) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let (context, maybe_ignore) = if mongodb {
        (
            quote! { crate::TestContext::mongodb().await },
            quote! { #[cfg_attr(not(feature = "mongodb-tests"), ignore = "needs a MongoDB replica set")] },
        )
    } else {
        (quote! { crate::TestContext::memory().await }, quote! {})
    };

    // Rewrite the test function.
    quote! {
        #[test]
        #maybe_ignore
        fn #name() {
            /// Test setup.
            async fn setup() -> crate::TestContext {
                #context
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(db: Option<mongodb::Database>) {
                if let Some(db) = db {
                    db.drop(None).await.unwrap();
                }
            }

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let context = outer_runtime.block_on(setup());
            let db = context.db.clone();

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let context_mutex = std::sync::Mutex::new(context);
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                let context = context_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(db));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::panic_any(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, map each parameter to the context field
/// to inject, and reject unknown or repeated parameters.
fn check_sig(sig: Signature, mongodb: bool) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = Vec::new();
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                // The last path segment names the type, e.g. `ledger::Store`.
                if let Some(segment) = type_path.path.segments.last() {
                    let type_name = segment.ident.to_string();
                    let field = match type_name.as_str() {
                        "Client" => Some(quote! { context.client }),
                        "Store" => Some(quote! { context.store }),
                        "VoteLedger" => Some(quote! { context.ledger }),
                        "HistoryLog" => Some(quote! { context.history }),
                        "Database" if mongodb => Some(quote! { context.db.unwrap() }),
                        "Database" => {
                            return Err(syn::Error::new(
                                input.span(),
                                "A `mongodb::Database` is only available in `#[backend_test(mongodb)]` tests",
                            ));
                        }
                        _ => None,
                    };
                    if let Some(field) = field {
                        if seen.contains(&type_name) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_name}`"),
                            ));
                        }
                        seen.push(type_name);
                        args.push(field);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected parameters of type `Client`, `Store`, `VoteLedger`, `HistoryLog` or `Database`",
        ));
    }

    Ok(args)
}
