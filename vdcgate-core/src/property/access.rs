use super::container::{NameMatch, PropertyContainer};
use super::descriptor::{PropertyDescriptor, PropertyDescriptorPtr};
use super::{AccessMode, PropertyPreparation};
use crate::error::ApiError;
use crate::ids::AccessDomain;
use crate::value::{ApiValue, ApiValuePtr, ApiValueType};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace};

/// Apply `query` to the property tree rooted at `container`.
///
/// Read mode returns an object mirroring the query with the values found.
/// Write modes return null. Descriptors flagged for preparation are accessed
/// after the synchronous walk, one at a time, in the order they were met.
pub async fn access_property(
    container: &Arc<dyn PropertyContainer>,
    mode: AccessMode,
    query: &dyn ApiValue,
    domain: AccessDomain,
    api_version: u32,
) -> Result<ApiValuePtr, ApiError> {
    let root = PropertyDescriptor::root(api_version);
    let mut result = query.new_value(ApiValueType::Object);
    let mut preparations = Vec::new();

    if mode == AccessMode::Read && !query.is_type(ApiValueType::Object) {
        let everything = wildcard_query(query);
        access_internal(
            container,
            mode,
            everything.as_ref(),
            domain,
            &root,
            result.as_mut(),
            &[],
            &mut preparations,
        )?;
    } else {
        access_internal(
            container,
            mode,
            query,
            domain,
            &root,
            result.as_mut(),
            &[],
            &mut preparations,
        )?;
    }

    if !preparations.is_empty() {
        debug!(
            mode = %mode,
            count = preparations.len(),
            "Draining property preparations"
        );
        drain_preparations(mode, preparations, result.as_mut()).await?;
    }

    if mode == AccessMode::Read {
        Ok(result)
    } else {
        Ok(query.new_value(ApiValueType::Null))
    }
}

fn wildcard_query(like: &dyn ApiValue) -> ApiValuePtr {
    let mut query = like.new_value(ApiValueType::Object);
    query.add_null("");
    query
}

/// Walk one object level. Read results are added to `result`, which is a
/// scratch object in write modes.
#[allow(clippy::too_many_arguments)]
fn access_internal(
    container: &Arc<dyn PropertyContainer>,
    mode: AccessMode,
    query: &dyn ApiValue,
    domain: AccessDomain,
    parent: &PropertyDescriptorPtr,
    result: &mut dyn ApiValue,
    path: &[String],
    preparations: &mut Vec<PropertyPreparation>,
) -> Result<(), ApiError> {
    if !query.is_type(ApiValueType::Object) {
        return Err(ApiError::invalid_value_type(format!(
            "query for '{}' must be an object",
            parent.path()
        )));
    }

    for name in query.keys() {
        let Some(subquery) = query.get(&name) else {
            continue;
        };
        let addressing = NameMatch::parse(&name);
        if mode.is_write() && addressing == NameMatch::Wildcard {
            return Err(ApiError::forbidden(format!(
                "wildcard not allowed in {} access",
                mode
            )));
        }

        let mut start_index = 0;
        let mut matched = false;
        while let Some(descriptor) =
            container.get_descriptor_by_name(&name, &mut start_index, domain, mode, parent)
        {
            matched = true;
            let mut entry_path = path.to_vec();
            entry_path.push(descriptor.name().to_string());

            if descriptor.needs_preparation(mode) {
                trace!(property = %descriptor.path(), "Deferring access until prepared");
                if mode == AccessMode::Read {
                    result.add_null(descriptor.name());
                }
                preparations.push(PropertyPreparation {
                    container: container.clone(),
                    descriptor: descriptor.clone(),
                    domain,
                    query: subquery.clone(),
                    result_path: entry_path,
                });
            } else {
                access_descriptor(
                    container,
                    mode,
                    &descriptor,
                    domain,
                    subquery.as_ref(),
                    result,
                    &entry_path,
                    preparations,
                )?;
            }

            if addressing != NameMatch::Wildcard {
                break;
            }
        }

        if !matched {
            match addressing {
                NameMatch::Name(unknown) if mode == AccessMode::Read => {
                    result.add_null(unknown);
                }
                NameMatch::Name(unknown) => {
                    return Err(ApiError::not_found(format!(
                        "unknown property '{}'",
                        join_path(parent, unknown)
                    )));
                }
                NameMatch::Index(index) if mode.is_write() => {
                    return Err(ApiError::no_content(format!(
                        "no element #{} in '{}'",
                        index,
                        parent.path()
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn join_path(parent: &PropertyDescriptorPtr, name: &str) -> String {
    if parent.is_root() {
        name.to_string()
    } else {
        format!("{}.{}", parent.path(), name)
    }
}

/// Access one resolved descriptor: recurse into structured ones, call
/// `access_field` for leaves.
#[allow(clippy::too_many_arguments)]
fn access_descriptor(
    container: &Arc<dyn PropertyContainer>,
    mode: AccessMode,
    descriptor: &PropertyDescriptorPtr,
    domain: AccessDomain,
    subquery: &dyn ApiValue,
    result: &mut dyn ApiValue,
    path: &[String],
    preparations: &mut Vec<PropertyPreparation>,
) -> Result<(), ApiError> {
    if descriptor.is_structured() {
        if mode == AccessMode::Delete && subquery.is_null() {
            return delete_field(container, descriptor, subquery);
        }
        let mut sub_domain = domain;
        let Some(sub_container) = container.get_container(descriptor, &mut sub_domain) else {
            if mode.is_write() {
                return Err(ApiError::forbidden(format!(
                    "'{}' is not accessible",
                    descriptor.path()
                )));
            }
            return Ok(());
        };

        if mode == AccessMode::Read {
            let everything;
            let subquery = if subquery.is_type(ApiValueType::Object) {
                subquery
            } else {
                everything = wildcard_query(subquery);
                everything.as_ref()
            };
            let mut entry = result.new_value(ApiValueType::Object);
            access_internal(
                &sub_container,
                mode,
                subquery,
                sub_domain,
                descriptor,
                entry.as_mut(),
                path,
                preparations,
            )?;
            result.add(descriptor.name(), entry);
        } else {
            if !subquery.is_type(ApiValueType::Object) {
                return Err(ApiError::invalid_value_type(format!(
                    "'{}' needs an object value, got {}",
                    descriptor.path(),
                    subquery.value_type()
                )));
            }
            access_internal(
                &sub_container,
                mode,
                subquery,
                sub_domain,
                descriptor,
                result,
                path,
                preparations,
            )?;
            container.written_property(mode, descriptor, sub_domain, &sub_container);
        }
        return Ok(());
    }

    match mode {
        AccessMode::Read => {
            let mut value = result.new_value(descriptor.value_type());
            if !container.access_field(mode, value.as_mut(), descriptor) {
                value.set_null();
            }
            result.add(descriptor.name(), value);
            Ok(())
        }
        AccessMode::Write | AccessMode::WritePreload => {
            if !is_compatible(descriptor.value_type(), subquery) {
                return Err(ApiError::invalid_value_type(format!(
                    "'{}' is {}, cannot take {}",
                    descriptor.path(),
                    descriptor.value_type(),
                    subquery.value_type()
                )));
            }
            let mut value = subquery.clone_value();
            if container.access_field(mode, value.as_mut(), descriptor) {
                Ok(())
            } else {
                Err(ApiError::forbidden(format!(
                    "'{}' is not writable",
                    descriptor.path()
                )))
            }
        }
        AccessMode::Delete => delete_field(container, descriptor, subquery),
    }
}

fn delete_field(
    container: &Arc<dyn PropertyContainer>,
    descriptor: &PropertyDescriptorPtr,
    subquery: &dyn ApiValue,
) -> Result<(), ApiError> {
    let mut value = subquery.new_value(ApiValueType::Null);
    if descriptor.is_deletable()
        && container.access_field(AccessMode::Delete, value.as_mut(), descriptor)
    {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "'{}' cannot be deleted",
            descriptor.path()
        )))
    }
}

/// Whether a leaf declared as `declared` accepts `value`. Null clears any
/// leaf; numeric kinds (bool included) convert among themselves.
fn is_compatible(declared: ApiValueType, value: &dyn ApiValue) -> bool {
    let actual = value.value_type();
    if actual == ApiValueType::Null {
        return true;
    }
    match declared {
        ApiValueType::Null => true,
        ApiValueType::Bool | ApiValueType::Int64 | ApiValueType::Uint64 | ApiValueType::Double => {
            actual.is_numeric()
        }
        ApiValueType::String => !actual.is_structured(),
        ApiValueType::Binary => matches!(actual, ApiValueType::Binary | ApiValueType::String),
        ApiValueType::Object | ApiValueType::Array => actual == declared,
    }
}

/// Prepare, access and finish each record in turn. Records produced while
/// accessing one record are drained before that record finishes.
fn drain_preparations<'a>(
    mode: AccessMode,
    preparations: Vec<PropertyPreparation>,
    result: &'a mut dyn ApiValue,
) -> BoxFuture<'a, Result<(), ApiError>> {
    Box::pin(async move {
        for preparation in preparations {
            let container = preparation.container.clone();
            let descriptor = preparation.descriptor.clone();
            let outcome = match container.prepare_access(mode, &preparation).await {
                Ok(()) => {
                    let mut nested = Vec::new();
                    let mut holder = result.new_value(ApiValueType::Object);
                    match access_descriptor(
                        &container,
                        mode,
                        &descriptor,
                        preparation.domain,
                        preparation.query.as_ref(),
                        holder.as_mut(),
                        &preparation.result_path,
                        &mut nested,
                    ) {
                        Ok(()) => {
                            if mode == AccessMode::Read {
                                splice(
                                    &mut *result,
                                    &preparation.result_path,
                                    holder.get(descriptor.name()),
                                );
                            }
                            drain_preparations(mode, nested, &mut *result).await
                        }
                        Err(err) => Err(err),
                    }
                }
                Err(err) => {
                    debug!(property = %descriptor.path(), error = %err, "Preparation failed");
                    Err(err)
                }
            };
            container.finish_access(mode, &descriptor);
            outcome?;
        }
        Ok(())
    })
}

/// Replace the placeholder at `path` with `value`, or remove it if the
/// prepared access produced nothing.
fn splice(target: &mut dyn ApiValue, path: &[String], value: Option<ApiValuePtr>) {
    match path {
        [] => {}
        [key] => match value {
            Some(value) => target.add(key, value),
            None => target.del(key),
        },
        [key, rest @ ..] => {
            if let Some(mut child) = target.get(key) {
                splice(child.as_mut(), rest, value);
                target.add(key, child);
            }
        }
    }
}
