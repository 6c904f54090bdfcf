use crate::model::Cursor;
use crate::model::Observation;
use crate::model::Payload;
use crate::model::Resource;
use crate::model::ServiceEntry;
use crate::model::StatusCode;
use crate::model::ValueNode;

pub fn service_entry(service: &str, id: &str) -> ServiceEntry {
    ServiceEntry {
        node: format!("node-{id}"),
        address: "10.0.0.1".into(),
        service_id: id.into(),
        service_name: service.into(),
        service_address: "10.0.0.1".into(),
        service_port: 8080,
        tags: vec!["primary".into()],
        modify_index: 0,
    }
}

pub fn value_node(key: &str, value: &str) -> ValueNode {
    ValueNode::new(key, value.to_string())
}

pub fn service_found(name: &str, entries: Vec<ServiceEntry>, cursor: Cursor) -> Observation {
    Observation {
        resource: Resource::service(name),
        status: StatusCode::OK,
        payload: Payload::Service(entries),
        cursor,
    }
}

pub fn key_found(key: &str, value: &str, cursor: Cursor) -> Observation {
    Observation {
        resource: Resource::key(key),
        status: StatusCode::OK,
        payload: Payload::Key(Some(value_node(key, value))),
        cursor,
    }
}

pub fn key_not_found(key: &str, cursor: Cursor) -> Observation {
    Observation {
        resource: Resource::key(key),
        status: StatusCode::NOT_FOUND,
        payload: Payload::Key(None),
        cursor,
    }
}

/// Found observation for `prefix`. An empty `nodes` is what a registry
/// returns for a prefix with nothing underneath.
pub fn prefix_found(prefix: &str, nodes: Vec<ValueNode>, cursor: Cursor) -> Observation {
    Observation {
        resource: Resource::prefix(prefix),
        status: StatusCode::OK,
        payload: Payload::KeyPrefix(Some(nodes)),
        cursor,
    }
}
