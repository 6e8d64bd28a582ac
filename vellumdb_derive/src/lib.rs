use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, FieldsNamed, Ident, LitStr};

/// Implements `vellumdb::Persist` for a struct with an `i64` id field.
///
/// The id field is `id` by name, or the field marked `#[persist(id)]`. The
/// recorded type name defaults to the struct identifier and can be
/// overridden with `#[persist(name = "...")]` on the struct.
#[proc_macro_derive(Persist, attributes(persist))]
pub fn derive_persist(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_persist(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Implements `vellumdb::IndexModel` for an index row struct.
///
/// The index name defaults to the struct identifier and can be overridden
/// with `#[index_model(name = "...")]`.
#[proc_macro_derive(IndexModel, attributes(index_model))]
pub fn derive_index_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_index_model(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_persist(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let type_name =
        name_override(&input, "persist")?.unwrap_or_else(|| ident.to_string());

    let fields = named_fields(&input, "Persist")?;
    let id_field = id_field(fields)?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::vellumdb::Persist for #ident #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #type_name
            }

            fn id(&self) -> i64 {
                self.#id_field
            }

            fn set_id(&mut self, id: i64) {
                self.#id_field = id;
            }
        }
    })
}

fn expand_index_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let index_name =
        name_override(&input, "index_model")?.unwrap_or_else(|| ident.to_string());

    // Index rows must be structs, like entities; the fields themselves are
    // free-form.
    named_fields(&input, "IndexModel")?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::vellumdb::IndexModel for #ident #ty_generics #where_clause {
            fn index_name() -> &'static str {
                #index_name
            }
        }
    })
}

fn named_fields<'a>(input: &'a DeriveInput, derive: &str) -> syn::Result<&'a FieldsNamed> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            format!("#[derive({derive})] only supports structs"),
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            format!("#[derive({derive})] requires named fields"),
        ));
    };
    Ok(fields)
}

/// Picks the id field: `#[persist(id)]` wins, a field literally named `id`
/// is the fallback.
fn id_field(fields: &FieldsNamed) -> syn::Result<Ident> {
    let mut marked: Option<Ident> = None;
    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("persist") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    marked = field.ident.clone();
                    Ok(())
                } else {
                    Err(meta.error("unsupported #[persist(...)] option on a field"))
                }
            })?;
        }
    }
    if let Some(ident) = marked {
        return Ok(ident);
    }

    fields
        .named
        .iter()
        .filter_map(|field| field.ident.clone())
        .find(|ident| ident == "id")
        .ok_or_else(|| {
            syn::Error::new_spanned(
                fields,
                "#[derive(Persist)] needs an `id: i64` field or one marked #[persist(id)]",
            )
        })
}

/// Reads `#[<attr>(name = "...")]` from the struct attributes.
fn name_override(input: &DeriveInput, attr_name: &str) -> syn::Result<Option<String>> {
    let mut name: Option<String> = None;
    for attr in &input.attrs {
        if !attr.path().is_ident(attr_name) {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error(format!("unsupported #[{attr_name}(...)] option")))
            }
        })?;
    }
    Ok(name)
}
