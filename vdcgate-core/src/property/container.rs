use super::descriptor::PropertyDescriptorPtr;
use super::{AccessMode, PropertyPreparation};
use crate::error::ApiError;
use crate::ids::AccessDomain;
use crate::value::ApiValue;
use async_trait::async_trait;
use std::sync::Arc;

/// How a query key addresses properties at one level of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch<'a> {
    /// `*` or empty: every property at this level.
    Wildcard,
    /// `#n`: the n-th property at this level.
    Index(usize),
    Name(&'a str),
}

impl<'a> NameMatch<'a> {
    pub fn parse(name: &'a str) -> Self {
        if name.is_empty() || name == "*" {
            return NameMatch::Wildcard;
        }
        if let Some(index) = name.strip_prefix('#').and_then(|n| n.parse().ok()) {
            return NameMatch::Index(index);
        }
        NameMatch::Name(name)
    }

    /// Whether this match may yield more than one descriptor or addresses by
    /// position rather than name.
    pub fn is_enumerating(&self) -> bool {
        !matches!(self, NameMatch::Name(_))
    }
}

/// An object contributing one level of the property tree.
///
/// Containers are shared (`Arc`) and accessed through `&self`; implementers
/// keep mutable state behind interior mutability. The access engine in
/// [`access_property`](super::access_property) drives these methods.
#[async_trait]
pub trait PropertyContainer: Send + Sync {
    fn num_props(&self, domain: AccessDomain, parent: &PropertyDescriptorPtr) -> usize;

    fn get_descriptor_by_index(
        &self,
        index: usize,
        domain: AccessDomain,
        parent: &PropertyDescriptorPtr,
    ) -> Option<PropertyDescriptorPtr>;

    /// Next descriptor matching `name`, scanning from `*start_index`.
    ///
    /// On a match `*start_index` is moved past it so repeated calls
    /// enumerate wildcard matches; `None` ends the search. Array-like
    /// containers override this for direct addressing or to create entries
    /// on write.
    fn get_descriptor_by_name(
        &self,
        name: &str,
        start_index: &mut usize,
        domain: AccessDomain,
        _mode: AccessMode,
        parent: &PropertyDescriptorPtr,
    ) -> Option<PropertyDescriptorPtr> {
        let count = self.num_props(domain, parent);
        match NameMatch::parse(name) {
            NameMatch::Wildcard => {
                while *start_index < count {
                    let index = *start_index;
                    *start_index += 1;
                    if let Some(descriptor) = self.get_descriptor_by_index(index, domain, parent) {
                        if descriptor.accepts_wildcard() {
                            return Some(descriptor);
                        }
                    }
                }
                None
            }
            NameMatch::Index(index) => {
                if *start_index > index || index >= count {
                    return None;
                }
                *start_index = count;
                self.get_descriptor_by_index(index, domain, parent)
            }
            NameMatch::Name(name) => {
                while *start_index < count {
                    let index = *start_index;
                    *start_index += 1;
                    if let Some(descriptor) = self.get_descriptor_by_index(index, domain, parent) {
                        if descriptor.name() == name {
                            *start_index = count;
                            return Some(descriptor);
                        }
                    }
                }
                None
            }
        }
    }

    /// Sub-container for a structured descriptor. May switch `domain` to
    /// the view the sub-container should be accessed with.
    fn get_container(
        &self,
        _descriptor: &PropertyDescriptorPtr,
        _domain: &mut AccessDomain,
    ) -> Option<Arc<dyn PropertyContainer>> {
        None
    }

    /// Read into, or write/delete from, `value` for a leaf descriptor.
    /// Returning `false` means the access is refused (forbidden), or in read
    /// mode that the property currently has no value.
    fn access_field(
        &self,
        _mode: AccessMode,
        _value: &mut dyn ApiValue,
        _descriptor: &PropertyDescriptorPtr,
    ) -> bool {
        false
    }

    /// Called after a successful write into `container`, the sub-container
    /// behind `descriptor`. `WritePreload` must not commit.
    fn written_property(
        &self,
        _mode: AccessMode,
        _descriptor: &PropertyDescriptorPtr,
        _domain: AccessDomain,
        _container: &Arc<dyn PropertyContainer>,
    ) {
    }

    /// Asynchronous step needed before a descriptor flagged for preparation
    /// can be accessed.
    async fn prepare_access(
        &self,
        _mode: AccessMode,
        _preparation: &PropertyPreparation,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Always called once per successful or failed prepared access.
    fn finish_access(&self, _mode: AccessMode, _descriptor: &PropertyDescriptorPtr) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectKey;
    use crate::property::descriptor::{PropertyDescription, PropertyDescriptor, PropertyFlags};
    use crate::value::ApiValueType;

    const KEY: ObjectKey = ObjectKey::new(1);

    static PROPS: [PropertyDescription; 3] = [
        PropertyDescription::new("a", ApiValueType::Int64, 0, KEY),
        PropertyDescription::new("hidden", ApiValueType::Int64, 1, KEY)
            .with_flags(PropertyFlags::NO_WILDCARD),
        PropertyDescription::new("c", ApiValueType::Int64, 2, KEY),
    ];

    struct Table;

    impl PropertyContainer for Table {
        fn num_props(&self, _domain: AccessDomain, _parent: &PropertyDescriptorPtr) -> usize {
            PROPS.len()
        }

        fn get_descriptor_by_index(
            &self,
            index: usize,
            _domain: AccessDomain,
            parent: &PropertyDescriptorPtr,
        ) -> Option<PropertyDescriptorPtr> {
            PROPS
                .get(index)
                .map(|d| PropertyDescriptor::from_static(d, parent))
        }
    }

    fn collect(name: &str) -> Vec<String> {
        let root = PropertyDescriptor::root(1);
        let mut start = 0;
        let mut names = Vec::new();
        while let Some(d) =
            Table.get_descriptor_by_name(name, &mut start, AccessDomain::DEFAULT, AccessMode::Read, &root)
        {
            names.push(d.name().to_string());
        }
        names
    }

    #[test]
    fn test_name_match_parsing() {
        assert_eq!(NameMatch::parse(""), NameMatch::Wildcard);
        assert_eq!(NameMatch::parse("*"), NameMatch::Wildcard);
        assert_eq!(NameMatch::parse("#2"), NameMatch::Index(2));
        assert_eq!(NameMatch::parse("#x"), NameMatch::Name("#x"));
        assert_eq!(NameMatch::parse("dSUID"), NameMatch::Name("dSUID"));
    }

    #[test]
    fn test_wildcard_skips_no_wildcard_descriptors() {
        assert_eq!(collect("*"), vec!["a", "c"]);
    }

    #[test]
    fn test_index_and_name_lookup() {
        assert_eq!(collect("#1"), vec!["hidden"]);
        assert_eq!(collect("#3"), Vec::<String>::new());
        assert_eq!(collect("c"), vec!["c"]);
        assert_eq!(collect("nope"), Vec::<String>::new());
    }
}
