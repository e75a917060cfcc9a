use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Type};

#[proc_macro_derive(ClosurePathModel, attributes(closure_path))]
pub fn derive_closure_path_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_closure_path_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    ancestor_field: Option<String>,
    descendant_field: Option<String>,
    depth_field: Option<String>,
    entity_name: Option<String>,
    node_type: Option<Type>,
}

fn impl_closure_path_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "ClosurePathModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("closure_path") {
            parse_closure_path_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let ancestor_field_name = options
        .ancestor_field
        .unwrap_or_else(|| "ancestor_id".to_string());
    let descendant_field_name = options
        .descendant_field
        .unwrap_or_else(|| "descendant_id".to_string());
    let depth_field_name = options.depth_field.unwrap_or_else(|| "depth".to_string());

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let ancestor_field_ident = Ident::new(&ancestor_field_name, struct_ident.span());
    let descendant_field_ident = Ident::new(&descendant_field_name, struct_ident.span());
    let depth_field_ident = Ident::new(&depth_field_name, struct_ident.span());

    let fields = match &data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                data_struct.fields.span(),
                "ClosurePathModel requires named fields",
            ))
        }
    };

    let field_type = |wanted: &Ident| {
        fields
            .named
            .iter()
            .find(|field| field.ident.as_ref() == Some(wanted))
            .map(|field| field.ty.clone())
    };

    let row_id_type = field_type(&id_field_ident).ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            format!("Missing row id field `{id_field_name}`; set `id_field` in #[closure_path]"),
        )
    })?;
    let node_type = match options.node_type {
        Some(ty) => ty,
        None => field_type(&ancestor_field_ident).ok_or_else(|| {
            syn::Error::new(
                struct_ident.span(),
                "Unable to determine node id type; specify `node_type = ...` in #[closure_path]",
            )
        })?,
    };
    for (name, ident) in [
        (&descendant_field_name, &descendant_field_ident),
        (&depth_field_name, &depth_field_ident),
    ] {
        if field_type(ident).is_none() {
            return Err(syn::Error::new(
                struct_ident.span(),
                format!("Missing closure column field `{name}`"),
            ));
        }
    }

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let ancestor_column_variant = format_ident!("{}", to_pascal_case(&ancestor_field_name));
    let descendant_column_variant = format_ident!("{}", to_pascal_case(&descendant_field_name));
    let depth_column_variant = format_ident!("{}", to_pascal_case(&depth_field_name));

    let entity_name_literal = syn::LitStr::new(&entity_name, struct_ident.span());
    let table_literal = syn::LitStr::new(&table, struct_ident.span());

    let generated = quote! {
        impl ::closure_planner::ClosurePathModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type NodeId = #node_type;
            type RowId = #row_id_type;

            fn closure_path_config() -> &'static ::closure_planner::ClosurePathConfig {
                static CONFIG: ::once_cell::sync::Lazy<::closure_planner::ClosurePathConfig> =
                    ::once_cell::sync::Lazy::new(|| {
                        ::closure_planner::ClosurePathConfig::new(
                            #entity_name_literal,
                            #table_literal,
                        )
                    });
                &CONFIG
            }

            fn row_id(&self) -> Self::RowId {
                self.#id_field_ident.clone()
            }

            fn ancestor(&self) -> Self::NodeId {
                self.#ancestor_field_ident.clone()
            }

            fn descendant(&self) -> Self::NodeId {
                self.#descendant_field_ident.clone()
            }

            fn depth(&self) -> ::closure_planner::Depth {
                self.#depth_field_ident
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn ancestor_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#ancestor_column_variant
            }

            fn descendant_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#descendant_column_variant
            }

            fn depth_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#depth_column_variant
            }

            fn node_to_value(id: &Self::NodeId) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn row_id_to_value(id: &Self::RowId) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn build_row(
                ancestor: Self::NodeId,
                descendant: Self::NodeId,
                depth: ::closure_planner::Depth,
            ) -> Self::ActiveModel {
                #[allow(clippy::needless_update)]
                {
                    ActiveModel {
                        #ancestor_field_ident: ::sea_orm::ActiveValue::Set(ancestor),
                        #descendant_field_ident: ::sea_orm::ActiveValue::Set(descendant),
                        #depth_field_ident: ::sea_orm::ActiveValue::Set(depth),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    };

    Ok(generated.into())
}

fn parse_closure_path_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        match ident.as_str() {
            "id_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.id_field = Some(value.value());
            }
            "ancestor_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.ancestor_field = Some(value.value());
            }
            "descendant_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.descendant_field = Some(value.value());
            }
            "depth_field" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.depth_field = Some(value.value());
            }
            "entity_name" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.entity_name = Some(value.value());
            }
            "node_type" => {
                let value: syn::LitStr = meta.value()?.parse()?;
                options.node_type = Some(parse_type(&value.value(), value.span())?);
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported closure_path option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // other sea_orm options carry values we do not need
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_type(value: &str, span: proc_macro2::Span) -> syn::Result<Type> {
    syn::parse_str::<Type>(value).map_err(|_| syn::Error::new(span, "Invalid type"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
