use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derives `memoorm::Diffable` and `memoorm::Entity` for a struct with named fields.
///
/// Struct attribute: `#[entity(name = "...")]` overrides the type name.
/// Field attributes: `#[entity(id)]` marks the id field (defaults to the
/// field called `id`), `#[entity(skip)]` leaves a field out of dirty
/// checking, `#[entity(rename = "...")]` changes its key in the field map.
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct EntityOptions {
    type_name: Option<String>,
}

#[derive(Default)]
struct FieldOptions {
    id: bool,
    skip: bool,
    rename: Option<String>,
}

struct EntityField {
    ident: Ident,
    ty: Type,
    options: FieldOptions,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let options = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut fields = Vec::<EntityField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        let options = parse_field_options(&field.attrs)?;
        fields.push(EntityField {
            ident,
            ty: field.ty,
            options,
        });
    }

    let id_field = resolve_id_field(&struct_name, &fields)?;
    let id_ident = &id_field.ident;
    let id_ty = &id_field.ty;

    let type_name = options
        .type_name
        .unwrap_or_else(|| struct_name.to_string());

    let field_inserts = fields
        .iter()
        .filter(|field| !field.options.skip)
        .map(|field| {
            let ident = &field.ident;
            let key = field
                .options
                .rename
                .clone()
                .unwrap_or_else(|| ident.to_string());
            quote! {
                fields.insert(
                    #key.to_string(),
                    ::memoorm::ToValue::to_value(&self.#ident),
                );
            }
        });

    Ok(quote! {
        impl ::memoorm::Diffable for #struct_name {
            fn fields(&self) -> ::memoorm::FieldMap {
                let mut fields = ::memoorm::FieldMap::new();
                #(#field_inserts)*
                fields
            }
        }

        impl ::memoorm::Entity for #struct_name {
            const TYPE_NAME: &'static str = #type_name;

            fn id(&self) -> ::memoorm::EntityId {
                <#id_ty as ::memoorm::IdValue>::to_entity_id(&self.#id_ident)
            }

            fn set_id(&mut self, id: ::memoorm::EntityId) -> ::memoorm::Result<()> {
                self.#id_ident = <#id_ty as ::memoorm::IdValue>::from_entity_id(id)?;
                Ok(())
            }
        }
    })
}

fn resolve_id_field<'a>(struct_name: &Ident, fields: &'a [EntityField]) -> syn::Result<&'a EntityField> {
    let mut marked = fields.iter().filter(|field| field.options.id);
    if let Some(first) = marked.next() {
        if let Some(second) = marked.next() {
            return Err(syn::Error::new(
                second.ident.span(),
                "Only one field can be marked #[entity(id)]",
            ));
        }
        return Ok(first);
    }

    fields
        .iter()
        .find(|field| field.ident == "id")
        .ok_or_else(|| {
            syn::Error::new(
                struct_name.span(),
                "Entity needs an `id` field or a field marked #[entity(id)]",
            )
        })
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.type_name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported entity attribute. Supported: name = \"...\""))
        })?;
    }

    Ok(options)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                options.id = true;
                return Ok(());
            }

            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }

            if meta.path.is_ident("rename") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.rename = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[entity(...)] option. Supported: id, skip, rename = \"...\"",
            ))
        })?;
    }

    if options.skip && options.rename.is_some() {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[entity(skip)] cannot define a field name",
        ));
    }

    Ok(options)
}
