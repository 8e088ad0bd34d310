extern crate proc_macro;
use proc_macro::TokenStream;

use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, parse_macro_input};

fn make_error(ident: &Ident, msg: &str) -> TokenStream {
    syn::Error::new_spanned(ident, msg)
        .to_compile_error()
        .into()
}

/// Derives both `DvSerialize` and `DvDeserialize` for a plain struct by
/// walking its fields in declaration order and delegating to each field's
/// own impl. Matches the on-disk layout of the struct exactly: no padding,
/// no reordering.
#[proc_macro_derive(DvDeSer)]
pub fn derive_dv_de_ser(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let data_struct = match data {
        Data::Struct(data_struct) => data_struct,
        _ => return make_error(&ident, "DvDeSer only supports structs"),
    };

    let fields = match data_struct.fields {
        Fields::Named(named) => named.named,
        _ => return make_error(&ident, "DvDeSer requires named fields"),
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let field_idents: Vec<_> = fields.iter().map(|f| f.ident.clone().unwrap()).collect();
    let field_types: Vec<_> = fields.iter().map(|f| f.ty.clone()).collect();

    let serialize_body = field_idents.iter().map(|name| {
        quote! {
            acc += ::dvida_serialize::DvSerialize::serialize(&self.#name, endianness, &mut target[acc..])?;
        }
    });

    let deserialize_body = field_idents.iter().zip(field_types.iter()).map(|(name, ty)| {
        quote! {
            let (#name, size) = <#ty as ::dvida_serialize::DvDeserialize>::deserialize(endianness, &input[acc..])?;
            acc += size;
        }
    });

    let expanded = quote! {
        impl #impl_generics ::dvida_serialize::DvSerialize for #ident #ty_generics #where_clause {
            fn serialize(
                &self,
                endianness: ::dvida_serialize::Endianness,
                target: &mut [u8],
            ) -> Result<usize, ::dvida_serialize::DvSerErr> {
                let mut acc: usize = 0;
                #(#serialize_body)*
                Ok(acc)
            }
        }

        impl #impl_generics ::dvida_serialize::DvDeserialize for #ident #ty_generics #where_clause {
            fn deserialize(
                endianness: ::dvida_serialize::Endianness,
                input: &[u8],
            ) -> Result<(Self, usize), ::dvida_serialize::DvDeErr> {
                let mut acc: usize = 0;
                #(#deserialize_body)*
                Ok((
                    #ident {
                        #(#field_idents),*
                    },
                    acc,
                ))
            }
        }
    };

    expanded.into()
}
