/// Declares a code enum together with a fallible conversion from a stream
/// word. Unknown codes map to the given [`crate::Fault`] variant so the
/// decoder can surface the corrupt stream instead of panicking.
macro_rules! code_enum {
    (
        $(#[$meta:meta])* $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $vname:ident = $val:expr,)*
        },
        $fault:ident
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname = $val,)*
        }

        impl core::convert::TryFrom<$crate::Word> for $name {
            type Error = $crate::Fault;

            fn try_from(v: $crate::Word) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as $crate::Word => Ok($name::$vname),)*
                    _ => Err($crate::Fault::$fault),
                }
            }
        }

        impl From<$name> for $crate::Word {
            fn from(v: $name) -> $crate::Word {
                v as $crate::Word
            }
        }
    }
}
