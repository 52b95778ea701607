//! # spark-flow-tck-macros
//!
//! `#[flow_tck]` 把 spark-flow 兼容性套件挂到调用方的测试模块上：
//!
//! ```ignore
//! #[spark_flow_tck::flow_tck]
//! mod my_publisher {}
//!
//! #[spark_flow_tck::flow_tck(suites(publisher, concurrency))]
//! mod my_publisher_subset {}
//! ```
//!
//! 每个选中的套件 `xxx` 展开为一个 `#[test] fn xxx_suite()`，其函数体调用
//! `spark_flow_tck::run_xxx_suite()`。套件名在编译期对照 `KNOWN_SUITES` 校验，
//! 重复列出的套件只生成一次。

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Ident, ItemMod, Meta, Result as SynResult, Token, parse_macro_input};

/// 套件名称清单，顺序与 `spark_flow_tck::all_suites()` 一致。
const KNOWN_SUITES: [&str; 6] = [
    "demand",
    "subscription",
    "publisher",
    "subscriber",
    "processor",
    "concurrency",
];

/// 为模块注入兼容性套件的 `#[test]` 入口。
///
/// 属性为空或写作裸 `suites` 时注入全部套件；`suites(a, b)` 只注入列出的套件。
/// 未知套件名、非标识符参数与其它属性形式都会变成指向出错位置的编译错误。
#[proc_macro_attribute]
pub fn flow_tck(attr: TokenStream, item: TokenStream) -> TokenStream {
    let module = parse_macro_input!(item as ItemMod);
    let expanded = selected_suites(attr.into()).map(|suites| attach_suites(&suites, module));
    match expanded {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// 把属性参数解析为去重后的套件列表。
fn selected_suites(attr: TokenStream2) -> SynResult<Vec<Ident>> {
    if attr.is_empty() {
        return Ok(every_suite());
    }
    let list = match syn::parse2::<Meta>(attr)? {
        Meta::Path(path) if path.is_ident("suites") => return Ok(every_suite()),
        Meta::List(list) if list.path.is_ident("suites") => list,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "flow_tck 只接受 `suites(...)` 参数",
            ));
        }
    };

    let entries = list.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
    let mut suites: Vec<Ident> = Vec::with_capacity(entries.len());
    for entry in entries {
        let ident = known_suite(&entry)?;
        if !suites.contains(&ident) {
            suites.push(ident);
        }
    }
    Ok(if suites.is_empty() { every_suite() } else { suites })
}

/// 校验单个参数是已登记的套件名。
fn known_suite(entry: &Meta) -> SynResult<Ident> {
    let Meta::Path(path) = entry else {
        return Err(syn::Error::new(entry.span(), "套件参数必须是裸标识符"));
    };
    let Some(ident) = path.get_ident() else {
        return Err(syn::Error::new(path.span(), "套件参数必须是裸标识符"));
    };
    let name = ident.to_string();
    if KNOWN_SUITES.contains(&name.as_str()) {
        Ok(ident.clone())
    } else {
        Err(syn::Error::new(
            ident.span(),
            format!("没有名为 `{name}` 的套件，可选：{}", KNOWN_SUITES.join(", ")),
        ))
    }
}

fn every_suite() -> Vec<Ident> {
    KNOWN_SUITES
        .iter()
        .map(|name| Ident::new(name, Span::call_site()))
        .collect()
}

/// 生成测试函数并放进模块。
///
/// `mod foo;` 形式没有内联内容，此时改写为同名内联模块，保留原有属性与可见性。
fn attach_suites(suites: &[Ident], mut module: ItemMod) -> TokenStream2 {
    let tests: Vec<syn::Item> = suites
        .iter()
        .map(|suite| {
            let test_fn = format_ident!("{}_suite", suite);
            let runner = format_ident!("run_{}_suite", suite);
            syn::parse_quote! {
                #[test]
                fn #test_fn() {
                    ::spark_flow_tck::#runner();
                }
            }
        })
        .collect();

    match module.content.as_mut() {
        Some((_, items)) => {
            items.extend(tests);
            quote! { #module }
        }
        None => {
            let ItemMod {
                attrs, vis, ident, ..
            } = &module;
            quote! {
                #(#attrs)*
                #vis mod #ident {
                    #(#tests)*
                }
            }
        }
    }
}
