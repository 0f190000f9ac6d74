use async_graphql::SimpleObject;

/// A table or view visible in the schema namespace
#[derive(SimpleObject, Clone, Debug)]
pub struct Table {
    pub name: String,
    /// `BASE TABLE`, `VIEW`, ...
    #[graphql(name = "type")]
    pub kind: String,
}
