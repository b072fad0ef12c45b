use kube::Resource;
use kube::runtime::reflector::ObjectRef;

pub fn get_object_ref_from_name<K: Resource>(
    name: impl AsRef<str>,
    ns: Option<impl AsRef<str>>,
) -> ObjectRef<K>
where
    K::DynamicType: Default,
{
    let object_ref = ObjectRef::new(name.as_ref());
    match ns {
        Some(ns) => object_ref.within(ns.as_ref()),
        None => object_ref,
    }
}

#[macro_export]
macro_rules! instrumented {
    ($span:expr, $($tt:tt)+) => {{
        use ::tracing::Instrument;

        let span = $span;
        {
            $($tt)*
        }
        .instrument(span)
    }}
}

#[cfg(test)]
#[macro_export]
macro_rules! from_json {
    ($($json:tt)+) => {
        ::serde_json::from_value(::serde_json::json!($($json)+)).expect("Invalid json")
    };
}
