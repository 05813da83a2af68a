#![deny(missing_docs)]
//! # tangent-core-derive — procedural macros for differentiable types
//!
//! This crate provides **derive macros** for the `tangent-core` library,
//! synthesizing memberwise tangent spaces for product types (structs
//! with named fields).
//!
//! ## Supported derives
//!
//! - **`#[derive(Differentiable)]`**: generates a `{Name}TangentVector`
//!   struct with one field per differentiable stored property, and
//!   implements `Differentiable` for both types
//! - **`#[derive(AdditiveArithmetic)]`**: implements `zero`, `plus` and
//!   `minus` componentwise
//! - **`#[derive(EuclideanDifferentiable)]`**: implements
//!   `differentiable_vector_view` as the memberwise view of the
//!   differentiable fields
//!
//! ## Attributes
//!
//! - `#[no_derivative]` on a field excludes it from the tangent space
//! - `#[differentiable(self_tangent)]` on the struct makes
//!   `TangentVector = Self`; every field must then be self-tangent and the
//!   struct must implement `AdditiveArithmetic`
//! - `#[differentiable(scalar = T)]` also implements `VectorProtocol`
//!   with scalar `T` on the tangent
//! - `#[differentiable(pointwise)]` also implements
//!   `PointwiseMultiplicative` on the tangent
//!
//! ## Usage
//!
//! These macros are re-exported through `tangent-core` when the `derive`
//! feature is enabled:
//!
//! ```ignore
//! use tangent_core::{AdditiveArithmetic, Differentiable};
//!
//! #[derive(Clone, Debug, PartialEq, Differentiable)]
//! #[differentiable(scalar = f32)]
//! struct Dense {
//!     w1: f32,
//!     #[no_derivative]
//!     w2: Option<f32>,
//! }
//!
//! // Generated:
//! // struct DenseTangentVector { w1: f32 }
//! ```
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::parse_macro_input;
use syn::parse_quote;
use syn::punctuated::Punctuated;
use syn::token::Comma;
use syn::Data;
use syn::DeriveInput;
use syn::Field;
use syn::Fields;
use syn::Ident;
use syn::Type;

/// Options read from `#[differentiable(...)]` on the struct.
#[derive(Default)]
struct ContainerOptions {
    self_tangent: bool,
    scalar: Option<Type>,
    pointwise: bool,
}

fn container_options(input: &DeriveInput) -> syn::Result<ContainerOptions> {
    let mut options = ContainerOptions::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("differentiable") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("self_tangent") {
                options.self_tangent = true;
                Ok(())
            } else if meta.path.is_ident("pointwise") {
                options.pointwise = true;
                Ok(())
            } else if meta.path.is_ident("scalar") {
                options.scalar = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error(
                    "unsupported differentiable option; expected `self_tangent`, `scalar = ...` or `pointwise`",
                ))
            }
        })?;
    }
    Ok(options)
}

/// Internal helper: ensure we're deriving on a struct with named fields.
fn get_named_fields(input: &DeriveInput) -> syn::Result<&Punctuated<Field, Comma>> {
    match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => Ok(&named.named),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "derive macros currently only support structs with named fields",
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "derive macros are only supported on structs",
        )),
    }
}

fn is_no_derivative(field: &Field) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident("no_derivative"))
}

fn field_ident(field: &Field) -> &Ident {
    field.ident.as_ref().expect("named fields only")
}

fn into_output(result: syn::Result<TokenStream2>) -> TokenStream {
    match result {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Derive macro for `Differentiable`.
///
/// Generates a `{Name}TangentVector` struct holding the tangent of every
/// field not marked `#[no_derivative]`, with `Clone`, `PartialEq`,
/// `Debug`, `AdditiveArithmetic` and `Differentiable` (as its own
/// tangent). Moving the struct moves each differentiable field; the
/// `#[no_derivative]` fields are left untouched.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq, Differentiable)]
/// struct Model {
///     weight: f32,
///     bias: f32,
///     #[no_derivative]
///     steps: usize,
/// }
///
/// let tangent = ModelTangentVector { weight: 1.0, bias: 0.0 };
/// ```
#[proc_macro_derive(Differentiable, attributes(differentiable, no_derivative))]
pub fn derive_differentiable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    into_output(expand_differentiable(&input))
}

fn expand_differentiable(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let options = container_options(input)?;
    let fields = get_named_fields(input)?;
    if options.self_tangent {
        return expand_self_tangent(input, fields, &options);
    }

    let name = &input.ident;
    let vis = &input.vis;
    let tangent = format_ident!("{}TangentVector", name);
    let tangent_name = tangent.to_string();

    let differentiable: Vec<&Field> = fields.iter().filter(|f| !is_no_derivative(f)).collect();
    let idents: Vec<&Ident> = differentiable.iter().map(|f| field_ident(f)).collect();
    let ident_names: Vec<String> = idents.iter().map(|i| i.to_string()).collect();
    let types: Vec<&Type> = differentiable.iter().map(|f| &f.ty).collect();
    let field_vis: Vec<_> = differentiable.iter().map(|f| &f.vis).collect();
    let field_docs: Vec<String> = ident_names
        .iter()
        .map(|n| format!("Tangent of `{name}::{n}`."))
        .collect();
    let struct_doc = format!("The tangent vector of [`{name}`], memberwise over its differentiable fields.");

    let mut generics = input.generics.clone();
    {
        let where_clause = generics.make_where_clause();
        for ty in &types {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::tangent_core::Differentiable));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut debug_generics = generics.clone();
    {
        let where_clause = debug_generics.make_where_clause();
        for ty in &types {
            where_clause.predicates.push(parse_quote!(
                <#ty as ::tangent_core::Differentiable>::TangentVector: ::core::fmt::Debug
            ));
        }
    }
    let (_, _, debug_where_clause) = debug_generics.split_for_impl();

    let mut expanded = quote! {
        #[doc = #struct_doc]
        #vis struct #tangent #impl_generics #where_clause {
            #(
                #[doc = #field_docs]
                #field_vis #idents: <#types as ::tangent_core::Differentiable>::TangentVector,
            )*
        }

        impl #impl_generics ::core::clone::Clone for #tangent #ty_generics
        #where_clause
        {
            fn clone(&self) -> Self {
                #tangent {
                    #( #idents: ::core::clone::Clone::clone(&self.#idents), )*
                }
            }
        }

        impl #impl_generics ::core::cmp::PartialEq for #tangent #ty_generics
        #where_clause
        {
            #[allow(unused_variables)]
            fn eq(&self, other: &Self) -> bool {
                true #( && self.#idents == other.#idents )*
            }
        }

        impl #impl_generics ::core::fmt::Debug for #tangent #ty_generics
        #debug_where_clause
        {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_struct(#tangent_name)
                    #( .field(#ident_names, &self.#idents) )*
                    .finish()
            }
        }

        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::AdditiveArithmetic for #tangent #ty_generics
        #where_clause
        {
            fn zero() -> Self {
                #tangent {
                    #( #idents: ::tangent_core::AdditiveArithmetic::zero(), )*
                }
            }

            fn plus(&self, other: &Self) -> Self {
                #tangent {
                    #( #idents: ::tangent_core::AdditiveArithmetic::plus(&self.#idents, &other.#idents), )*
                }
            }

            fn minus(&self, other: &Self) -> Self {
                #tangent {
                    #( #idents: ::tangent_core::AdditiveArithmetic::minus(&self.#idents, &other.#idents), )*
                }
            }
        }

        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::Differentiable for #tangent #ty_generics
        #where_clause
        {
            type TangentVector = Self;

            fn move_along(&mut self, direction: &Self) {
                #( ::tangent_core::Differentiable::move_along(&mut self.#idents, &direction.#idents); )*
            }

            fn zero_tangent_vector(&self) -> Self {
                #tangent {
                    #( #idents: ::tangent_core::Differentiable::zero_tangent_vector(&self.#idents), )*
                }
            }
        }

        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::Differentiable for #name #ty_generics
        #where_clause
        {
            type TangentVector = #tangent #ty_generics;

            fn move_along(&mut self, direction: &Self::TangentVector) {
                #( ::tangent_core::Differentiable::move_along(&mut self.#idents, &direction.#idents); )*
            }

            fn zero_tangent_vector(&self) -> Self::TangentVector {
                #tangent {
                    #( #idents: ::tangent_core::Differentiable::zero_tangent_vector(&self.#idents), )*
                }
            }
        }
    };

    let tangent_types: Vec<Type> = types
        .iter()
        .map(|ty| parse_quote!(<#ty as ::tangent_core::Differentiable>::TangentVector))
        .collect();
    let tangent_ty: Type = parse_quote!(#tangent #ty_generics);
    if let Some(scalar) = &options.scalar {
        expanded.extend(vector_protocol_impl(
            &generics,
            &tangent_ty,
            &tangent,
            &idents,
            &tangent_types,
            scalar,
        ));
    }
    if options.pointwise {
        expanded.extend(pointwise_impl(
            &generics,
            &tangent_ty,
            &tangent,
            &idents,
            &tangent_types,
        ));
    }
    Ok(expanded)
}

fn expand_self_tangent(
    input: &DeriveInput,
    fields: &Punctuated<Field, Comma>,
    options: &ContainerOptions,
) -> syn::Result<TokenStream2> {
    if let Some(field) = fields.iter().find(|f| is_no_derivative(f)) {
        return Err(syn::Error::new_spanned(
            field,
            "`#[differentiable(self_tangent)]` requires every stored property to be differentiable; remove `#[no_derivative]` or the `self_tangent` option",
        ));
    }

    let name = &input.ident;
    let idents: Vec<&Ident> = fields.iter().map(field_ident).collect();
    let types: Vec<&Type> = fields.iter().map(|f| &f.ty).collect();

    let mut generics = input.generics.clone();
    let self_ty: Type = {
        let (_, ty_generics, _) = input.generics.split_for_impl();
        parse_quote!(#name #ty_generics)
    };
    {
        let where_clause = generics.make_where_clause();
        where_clause
            .predicates
            .push(parse_quote!(#self_ty: ::tangent_core::AdditiveArithmetic));
        for ty in &types {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::tangent_core::Differentiable<TangentVector = #ty>));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut expanded = quote! {
        impl #impl_generics ::tangent_core::Differentiable for #name #ty_generics
        #where_clause
        {
            type TangentVector = Self;

            fn move_along(&mut self, direction: &Self) {
                ::tangent_core::AdditiveArithmetic::plus_assign(self, direction);
            }

            fn zero_tangent_vector(&self) -> Self {
                #name {
                    #( #idents: ::tangent_core::Differentiable::zero_tangent_vector(&self.#idents), )*
                }
            }
        }
    };

    let field_types: Vec<Type> = types.iter().map(|ty| (*ty).clone()).collect();
    if let Some(scalar) = &options.scalar {
        expanded.extend(vector_protocol_impl(
            &generics,
            &self_ty,
            name,
            &idents,
            &field_types,
            scalar,
        ));
    }
    if options.pointwise {
        expanded.extend(pointwise_impl(
            &generics,
            &self_ty,
            name,
            &idents,
            &field_types,
        ));
    }
    Ok(expanded)
}

/// `VectorProtocol` for a memberwise vector type whose members share
/// the scalar type `scalar`.
fn vector_protocol_impl(
    generics: &syn::Generics,
    target: &Type,
    constructor: &Ident,
    idents: &[&Ident],
    member_types: &[Type],
    scalar: &Type,
) -> TokenStream2 {
    let mut generics = generics.clone();
    {
        let where_clause = generics.make_where_clause();
        where_clause
            .predicates
            .push(parse_quote!(#scalar: ::tangent_core::AdditiveArithmetic));
        for ty in member_types {
            where_clause.predicates.push(parse_quote!(
                #ty: ::tangent_core::VectorProtocol<VectorSpaceScalar = #scalar>
            ));
        }
    }
    let (impl_generics, _, where_clause) = generics.split_for_impl();

    quote! {
        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::VectorProtocol for #target
        #where_clause
        {
            type VectorSpaceScalar = #scalar;

            fn adding_scalar(&self, x: &#scalar) -> Self {
                #constructor {
                    #( #idents: ::tangent_core::VectorProtocol::adding_scalar(&self.#idents, x), )*
                }
            }

            fn subtracting_scalar(&self, x: &#scalar) -> Self {
                #constructor {
                    #( #idents: ::tangent_core::VectorProtocol::subtracting_scalar(&self.#idents, x), )*
                }
            }

            fn scaled(&self, scale: &#scalar) -> Self {
                #constructor {
                    #( #idents: ::tangent_core::VectorProtocol::scaled(&self.#idents, scale), )*
                }
            }
        }
    }
}

fn pointwise_impl(
    generics: &syn::Generics,
    target: &Type,
    constructor: &Ident,
    idents: &[&Ident],
    member_types: &[Type],
) -> TokenStream2 {
    let mut generics = generics.clone();
    {
        let where_clause = generics.make_where_clause();
        for ty in member_types {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::tangent_core::PointwiseMultiplicative));
        }
    }
    let (impl_generics, _, where_clause) = generics.split_for_impl();

    quote! {
        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::PointwiseMultiplicative for #target
        #where_clause
        {
            fn one() -> Self {
                #constructor {
                    #( #idents: ::tangent_core::PointwiseMultiplicative::one(), )*
                }
            }

            fn reciprocal(&self) -> Self {
                #constructor {
                    #( #idents: ::tangent_core::PointwiseMultiplicative::reciprocal(&self.#idents), )*
                }
            }

            fn pointwise_mul(&self, other: &Self) -> Self {
                #constructor {
                    #( #idents: ::tangent_core::PointwiseMultiplicative::pointwise_mul(&self.#idents, &other.#idents), )*
                }
            }
        }
    }
}

/// Derive macro for `AdditiveArithmetic`.
///
/// Implements `zero`, `plus` and `minus` componentwise over every field.
/// Combine with `#[differentiable(self_tangent)]` to make a struct its
/// own tangent space.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq, AdditiveArithmetic, Differentiable)]
/// #[differentiable(self_tangent)]
/// struct Vector {
///     x: f32,
///     y: f32,
/// }
/// ```
#[proc_macro_derive(AdditiveArithmetic, attributes(differentiable, no_derivative))]
pub fn derive_additive_arithmetic(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    into_output(expand_additive_arithmetic(&input))
}

fn expand_additive_arithmetic(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let fields = get_named_fields(input)?;
    let idents: Vec<&Ident> = fields.iter().map(field_ident).collect();
    let types: Vec<&Type> = fields.iter().map(|f| &f.ty).collect();

    let mut generics = input.generics.clone();
    {
        let where_clause = generics.make_where_clause();
        for ty in &types {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::tangent_core::AdditiveArithmetic));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        #[allow(unused_variables)]
        impl #impl_generics ::tangent_core::AdditiveArithmetic for #name #ty_generics
        #where_clause
        {
            fn zero() -> Self {
                #name {
                    #( #idents: ::tangent_core::AdditiveArithmetic::zero(), )*
                }
            }

            fn plus(&self, other: &Self) -> Self {
                #name {
                    #( #idents: ::tangent_core::AdditiveArithmetic::plus(&self.#idents, &other.#idents), )*
                }
            }

            fn minus(&self, other: &Self) -> Self {
                #name {
                    #( #idents: ::tangent_core::AdditiveArithmetic::minus(&self.#idents, &other.#idents), )*
                }
            }
        }
    })
}

/// Derive macro for `EuclideanDifferentiable`.
///
/// For `#[differentiable(self_tangent)]` structs the view is a clone of
/// the value. Otherwise it is the generated tangent struct built from
/// the views of the differentiable fields, so every such field must be
/// `EuclideanDifferentiable`.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq, Differentiable, EuclideanDifferentiable)]
/// struct Layer {
///     weight: f32,
///     #[no_derivative]
///     frozen: bool,
/// }
///
/// let view = Layer { weight: 2.0, frozen: true }.differentiable_vector_view();
/// assert_eq!(view, LayerTangentVector { weight: 2.0 });
/// ```
#[proc_macro_derive(EuclideanDifferentiable, attributes(differentiable, no_derivative))]
pub fn derive_euclidean_differentiable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    into_output(expand_euclidean(&input))
}

fn expand_euclidean(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let options = container_options(input)?;
    let fields = get_named_fields(input)?;
    let name = &input.ident;
    let mut generics = input.generics.clone();

    if options.self_tangent {
        let self_ty: Type = {
            let (_, ty_generics, _) = input.generics.split_for_impl();
            parse_quote!(#name #ty_generics)
        };
        generics.make_where_clause().predicates.push(parse_quote!(
            #self_ty: ::tangent_core::Differentiable<TangentVector = #self_ty> + ::core::clone::Clone
        ));
        let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
        return Ok(quote! {
            impl #impl_generics ::tangent_core::EuclideanDifferentiable for #name #ty_generics
            #where_clause
            {
                fn differentiable_vector_view(&self) -> Self {
                    ::core::clone::Clone::clone(self)
                }
            }
        });
    }

    let tangent = format_ident!("{}TangentVector", name);
    let differentiable: Vec<&Field> = fields.iter().filter(|f| !is_no_derivative(f)).collect();
    let idents: Vec<&Ident> = differentiable.iter().map(|f| field_ident(f)).collect();
    {
        let where_clause = generics.make_where_clause();
        for field in &differentiable {
            let ty = &field.ty;
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::tangent_core::EuclideanDifferentiable));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::tangent_core::EuclideanDifferentiable for #name #ty_generics
        #where_clause
        {
            fn differentiable_vector_view(&self) -> Self::TangentVector {
                #tangent {
                    #( #idents: ::tangent_core::EuclideanDifferentiable::differentiable_vector_view(&self.#idents), )*
                }
            }
        }
    })
}
