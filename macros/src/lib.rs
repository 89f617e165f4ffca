use convert_case::{Case, Casing};
use darling::util::Override;
use darling::{FromDeriveInput, FromField};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

#[derive(Debug, FromDeriveInput)]
#[darling(attributes(permanent))]
struct ModelOption {
    #[darling(default)]
    table: Option<String>,
    #[darling(default)]
    label: Option<String>,
    #[darling(default)]
    restore_on_create: bool,
}

#[derive(Debug, FromField)]
#[darling(attributes(permanent))]
struct FieldOption {
    #[darling(default)]
    skip: bool,
    #[darling(default)]
    column: Option<String>,
    #[darling(default)]
    primary_key: bool,
    #[darling(default)]
    unique: bool,
    #[darling(default)]
    marker: Option<Override<String>>,
    #[darling(default)]
    references: Option<String>,
    #[darling(default)]
    on_delete: Option<String>,
}

#[proc_macro_derive(Permanent, attributes(permanent))]
pub fn derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match generator(&input) {
        Ok(generated) => generated.into(),
        Err(err) => err.into(),
    }
}

fn darling_err(e: darling::Error) -> TokenStream2 {
    e.write_errors()
}

fn syn_err<T: quote::ToTokens>(tokens: T, msg: &str) -> TokenStream2 {
    syn::Error::new_spanned(tokens, msg).to_compile_error()
}

fn soft_delete(kind: &str) -> Option<TokenStream2> {
    match kind {
        "time" => Some(quote!(::permanent::SoftDelete::Time)),
        "flag" => Some(quote!(::permanent::SoftDelete::Flag)),
        "unix_time" => Some(quote!(::permanent::SoftDelete::UnixTime)),
        _ => None,
    }
}

fn reference_option(option: &str) -> Option<TokenStream2> {
    match option {
        "cascade" => Some(quote!(::permanent::ReferenceOption::Cascade)),
        "restrict" => Some(quote!(::permanent::ReferenceOption::Restrict)),
        "set_null" => Some(quote!(::permanent::ReferenceOption::SetNull)),
        "set_zero" => Some(quote!(::permanent::ReferenceOption::SetZero)),
        _ => None,
    }
}

fn generator(derive_input: &DeriveInput) -> Result<TokenStream2, TokenStream2> {
    let model = ModelOption::from_derive_input(derive_input).map_err(darling_err)?;
    let struct_data = match &derive_input.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(fields),
            ..
        }) => fields,
        _ => {
            return Err(syn_err(
                &derive_input.ident,
                "Must be struct type with named fields",
            ));
        }
    };
    if !derive_input.generics.params.is_empty() {
        return Err(syn_err(
            &derive_input.generics,
            "Generic models are not supported",
        ));
    }

    let struct_name = &derive_input.ident;
    let table = model
        .table
        .unwrap_or_else(|| struct_name.to_string().to_case(Case::Snake));
    let label = model.label.unwrap_or_else(|| struct_name.to_string());
    let restore_on_create = model.restore_on_create;

    let mut primary_key = None;
    let mut columns = Vec::new();
    let mut foreign_keys = Vec::new();
    let mut marker = None;
    let mut to_row = Vec::new();
    let mut from_row = Vec::new();
    for field in &struct_data.named {
        let option = FieldOption::from_field(field).map_err(darling_err)?;
        let ident = match &field.ident {
            Some(ident) => ident,
            None => return Err(syn_err(field, "Must be a named field")),
        };
        if option.skip {
            from_row.push(quote!(#ident: ::std::default::Default::default()));
            continue;
        }
        let ty = &field.ty;
        let name = option.column.clone().unwrap_or_else(|| {
            ident.to_string().trim_start_matches("r#").to_owned()
        });

        if option.primary_key {
            if primary_key.is_some() {
                return Err(syn_err(field, "Only one primary key is supported"));
            }
            primary_key = Some(name.clone());
        }
        let column_type = quote!(<#ty as ::permanent::HasColumnType>::COLUMN_TYPE);
        if option.unique {
            columns.push(quote!(.unique_column(#name, #column_type)));
        } else {
            columns.push(quote!(.column(#name, #column_type)));
        }

        if let Some(m) = &option.marker {
            if marker.is_some() {
                return Err(syn_err(field, "Only one marker field is supported"));
            }
            marker = Some(match m {
                Override::Inherit => {
                    quote!(::permanent::Settings::global().marker_for(#name))
                }
                Override::Explicit(kind) => match soft_delete(kind) {
                    Some(kind) => quote!(::permanent::Marker::new(#name, #kind)),
                    None => {
                        return Err(syn_err(
                            field,
                            "marker must be one of \"time\", \"flag\" or \"unix_time\"",
                        ))
                    }
                },
            });
        }

        match (&option.references, &option.on_delete) {
            (Some(references), on_delete) => {
                let on_delete = on_delete.as_deref().unwrap_or("cascade");
                let Some(on_delete) = reference_option(on_delete) else {
                    return Err(syn_err(
                        field,
                        "on_delete must be one of \"cascade\", \"restrict\", \"set_null\" or \"set_zero\"",
                    ));
                };
                foreign_keys.push(quote!(.foreign_key(#name, #references, #on_delete)));
            }
            (None, Some(_)) => {
                return Err(syn_err(field, "on_delete requires references"));
            }
            (None, None) => {}
        }

        to_row.push(quote! {
            row.insert(
                #name.to_owned(),
                ::permanent::Value::from(::std::clone::Clone::clone(&self.#ident)),
            );
        });
        from_row.push(quote!(#ident: ::permanent::__private::column(row, #name)?));
    }
    let primary_key = primary_key.unwrap_or_else(|| "id".to_owned());
    let marker = marker.map(|m| quote!(.marker(#m)));

    let result = quote! {
        impl ::permanent::Model for #struct_name {
            fn meta() -> &'static ::permanent::ModelMeta {
                static META: ::permanent::__private::Lazy<::permanent::ModelMeta> =
                    ::permanent::__private::Lazy::new(|| {
                        ::permanent::ModelMeta::new(#table)
                            .label(#label)
                            .primary_key(#primary_key)
                            #(#columns)*
                            #(#foreign_keys)*
                            #marker
                            .restore_on_create(#restore_on_create)
                    });
                &META
            }

            fn to_row(&self) -> ::permanent::Row {
                let mut row = ::permanent::Row::new();
                #(#to_row)*
                row
            }

            fn from_row(row: &::permanent::Row) -> ::permanent::__private::Result<Self> {
                ::std::result::Result::Ok(Self {
                    #(#from_row,)*
                })
            }
        }
    };
    Ok(result)
}
