//! In-memory service state and the operations clients perform on it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use docdb_client::auth::{decode_header, is_master_token, MasterKey};
use docdb_client::link::{child_link, database_link, trim_link, ResourceKind};
use docdb_client::{
    Collection, Database, Document, FeedOptions, PartitionKey, PartitionKeyDefinition,
    Permission, QuerySpec, ResourcePath, StoredProcedure, SystemProperties, User,
};

use crate::access::{check_grant, Access, PartitionScope, Principal, RESOURCE_TOKEN_PREFIX};
use crate::client::EmulatorClient;
use crate::config::EmulatorConfig;
use crate::error::{EmulatorError, Result};
use crate::procedure::{ProcedureContext, ProcedureRegistry};
use crate::query::DocumentQuery;

struct CollectionState {
    collection: Collection,
    /// Partition value (canonical form) -> id -> document
    documents: BTreeMap<String, BTreeMap<String, Document>>,
    procedures: BTreeMap<String, StoredProcedure>,
}

impl CollectionState {
    fn partition_field(&self) -> Option<&str> {
        self.collection
            .partition_key
            .as_ref()
            .and_then(PartitionKeyDefinition::field)
    }

    /// Bucket a request lands in. Unpartitioned collections use one bucket.
    fn bucket(&self, partition: Option<&PartitionKey>) -> Result<String> {
        if self.partition_field().is_none() {
            return Ok(String::new());
        }
        partition.map(PartitionKey::canonical).ok_or_else(|| {
            EmulatorError::BadRequest(format!(
                "Collection '{}' is partitioned; the request needs a partition key",
                self.collection.id
            ))
        })
    }

    fn all_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values().flat_map(BTreeMap::values)
    }
}

struct UserState {
    user: User,
    permissions: BTreeMap<String, Permission>,
}

struct DatabaseState {
    database: Database,
    collections: BTreeMap<String, CollectionState>,
    users: BTreeMap<String, UserState>,
}

/// Where an issued resource token points.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Grant {
    database: String,
    user: String,
    permission: String,
}

#[derive(Default)]
struct State {
    databases: BTreeMap<String, DatabaseState>,
    grants: HashMap<String, Grant>,
    last_ts: u64,
}

impl State {
    /// Strictly increasing modification time in seconds.
    fn next_ts(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_ts = now.max(self.last_ts + 1);
        self.last_ts
    }

    fn system(&mut self, link: &str) -> SystemProperties {
        SystemProperties {
            rid: Uuid::new_v4().simple().to_string(),
            self_link: format!("{}/", trim_link(link)),
            etag: format!("\"{}\"", Uuid::new_v4()),
            ts: self.next_ts(),
        }
    }

    fn touch(&mut self, system: &mut SystemProperties) {
        system.etag = format!("\"{}\"", Uuid::new_v4());
        system.ts = self.next_ts();
    }

    fn database(&self, id: &str) -> Result<&DatabaseState> {
        self.databases
            .get(id)
            .ok_or_else(|| EmulatorError::NotFound(database_link(id)))
    }

    fn database_mut(&mut self, id: &str) -> Result<&mut DatabaseState> {
        self.databases
            .get_mut(id)
            .ok_or_else(|| EmulatorError::NotFound(database_link(id)))
    }

    fn collection(&self, db: &str, coll: &str) -> Result<&CollectionState> {
        self.database(db)?.collections.get(coll).ok_or_else(|| {
            EmulatorError::NotFound(child_link(&database_link(db), ResourceKind::Collection, coll))
        })
    }

    fn collection_mut(&mut self, db: &str, coll: &str) -> Result<&mut CollectionState> {
        self.database_mut(db)?
            .collections
            .get_mut(coll)
            .ok_or_else(|| {
                EmulatorError::NotFound(child_link(
                    &database_link(db),
                    ResourceKind::Collection,
                    coll,
                ))
            })
    }

    fn user(&self, db: &str, user: &str) -> Result<&UserState> {
        self.database(db)?.users.get(user).ok_or_else(|| {
            EmulatorError::NotFound(child_link(&database_link(db), ResourceKind::User, user))
        })
    }

    fn user_mut(&mut self, db: &str, user: &str) -> Result<&mut UserState> {
        self.database_mut(db)?.users.get_mut(user).ok_or_else(|| {
            EmulatorError::NotFound(child_link(&database_link(db), ResourceKind::User, user))
        })
    }

    /// Permission behind a token; unknown or revoked tokens are unauthorized.
    fn permission_for_token(&self, token: &str) -> Result<&Permission> {
        let unauthorized =
            || EmulatorError::Unauthorized("Resource token is unknown or revoked".to_string());
        let grant = self.grants.get(token).ok_or_else(unauthorized)?;
        self.databases
            .get(&grant.database)
            .and_then(|db| db.users.get(&grant.user))
            .and_then(|user| user.permissions.get(&grant.permission))
            .ok_or_else(unauthorized)
    }

    fn authorize(
        &self,
        principal: &Principal,
        target: &ResourcePath,
        access: Access,
        scope: PartitionScope<'_>,
    ) -> Result<()> {
        match principal {
            Principal::Master => Ok(()),
            Principal::ResourceToken(token) => {
                let permission = self.permission_for_token(token)?;
                check_grant(permission, target, access, scope)
            }
        }
    }

    fn require_master(&self, principal: &Principal, operation: &str) -> Result<()> {
        match principal {
            Principal::Master => Ok(()),
            Principal::ResourceToken(token) => {
                self.permission_for_token(token)?;
                Err(EmulatorError::Forbidden(format!(
                    "{} requires the master key",
                    operation
                )))
            }
        }
    }
}

fn parse_item(link: &str, kind: ResourceKind) -> Result<ResourcePath> {
    let path = ResourcePath::parse(link)?;
    if path.is_feed() || path.kind() != kind {
        return Err(EmulatorError::BadRequest(format!(
            "'{}' is not a {} link",
            link,
            kind.segment()
        )));
    }
    Ok(path)
}

/// Id of `kind` on `path`; present for every kind on the path by construction.
fn id_of(path: &ResourcePath, kind: ResourceKind) -> Result<String> {
    path.id_of(kind)
        .map(str::to_string)
        .ok_or_else(|| EmulatorError::BadRequest(format!("'{}' has no {} id", path.path(), kind.segment())))
}

fn feed_path(parent: &str, kind: ResourceKind) -> Result<ResourcePath> {
    Ok(ResourcePath::parse(&docdb_client::link::feed_link(parent, kind))?)
}

fn partition_scope<'a>(options: &'a FeedOptions) -> PartitionScope<'a> {
    match &options.partition_key {
        Some(partition) => PartitionScope::Single(partition),
        None if options.enable_cross_partition => PartitionScope::CrossPartition,
        None => PartitionScope::Unscoped,
    }
}

fn scope_of(partition: Option<&PartitionKey>) -> PartitionScope<'_> {
    match partition {
        Some(partition) => PartitionScope::Single(partition),
        None => PartitionScope::Unscoped,
    }
}

/// In-memory stand-in for the document-database service.
pub struct Emulator {
    config: EmulatorConfig,
    master_key: MasterKey,
    state: RwLock<State>,
    procedures: ProcedureRegistry,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Result<Self> {
        let master_key = MasterKey::from_base64(&config.master_key)?;
        Ok(Self {
            config,
            master_key,
            state: RwLock::new(State::default()),
            procedures: ProcedureRegistry::new(),
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Native handlers bound to procedure ids.
    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.procedures
    }

    /// In-process client authenticating with the master key.
    pub fn client(self: &Arc<Self>) -> EmulatorClient {
        EmulatorClient::master(Arc::clone(self))
    }

    /// Resolves the `authorization` header of a request on `path`.
    pub fn authenticate(
        &self,
        authorization: Option<&str>,
        verb: &str,
        path: &ResourcePath,
        date: Option<&str>,
    ) -> Result<Principal> {
        let header = authorization.ok_or_else(|| {
            EmulatorError::Unauthorized("Missing authorization header".to_string())
        })?;
        let token = decode_header(header)?;

        if is_master_token(&token) {
            let date = date.ok_or_else(|| {
                EmulatorError::Unauthorized("Missing x-ms-date header".to_string())
            })?;
            if self.master_key.verify(
                &token,
                verb,
                path.resource_type(),
                &path.resource_link(),
                date,
            ) {
                return Ok(Principal::Master);
            }
            return Err(EmulatorError::Unauthorized(
                "Master key signature does not match the request".to_string(),
            ));
        }

        if token.starts_with(RESOURCE_TOKEN_PREFIX) && self.state.read().grants.contains_key(&token)
        {
            return Ok(Principal::ResourceToken(token));
        }
        Err(EmulatorError::Unauthorized(
            "Resource token is unknown or revoked".to_string(),
        ))
    }

    /// Creates a database outside the request path.
    pub fn provision_database(&self, id: &str) -> Result<Database> {
        let mut state = self.state.write();
        let link = database_link(id);
        if state.databases.contains_key(id) {
            return Err(EmulatorError::Conflict(link));
        }
        let database = Database {
            id: id.to_string(),
            system: state.system(&link),
        };
        state.databases.insert(
            id.to_string(),
            DatabaseState {
                database: database.clone(),
                collections: BTreeMap::new(),
                users: BTreeMap::new(),
            },
        );
        info!(database = id, "provisioned database");
        Ok(database)
    }

    /// Creates a collection outside the request path.
    pub fn provision_collection(
        &self,
        database_id: &str,
        id: &str,
        partition_key: Option<PartitionKeyDefinition>,
    ) -> Result<Collection> {
        let mut state = self.state.write();
        let link = child_link(&database_link(database_id), ResourceKind::Collection, id);
        if state.database(database_id)?.collections.contains_key(id) {
            return Err(EmulatorError::Conflict(link));
        }
        let collection = Collection {
            id: id.to_string(),
            partition_key,
            system: state.system(&link),
        };
        state.database_mut(database_id)?.collections.insert(
            id.to_string(),
            CollectionState {
                collection: collection.clone(),
                documents: BTreeMap::new(),
                procedures: BTreeMap::new(),
            },
        );
        info!(database = database_id, collection = id, "provisioned collection");
        Ok(collection)
    }

    pub fn read_database(&self, principal: &Principal, link: &str) -> Result<Database> {
        let path = parse_item(link, ResourceKind::Database)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let state = self.state.read();
        state.authorize(principal, &path, Access::Read, PartitionScope::Unscoped)?;
        Ok(state.database(&db)?.database.clone())
    }

    pub fn read_collection(&self, principal: &Principal, link: &str) -> Result<Collection> {
        let path = parse_item(link, ResourceKind::Collection)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let state = self.state.read();
        state.authorize(principal, &path, Access::Read, PartitionScope::Unscoped)?;
        Ok(state.collection(&db, &coll)?.collection.clone())
    }

    pub fn create_document(
        &self,
        principal: &Principal,
        collection_link: &str,
        mut document: Document,
        partition: Option<&PartitionKey>,
    ) -> Result<Document> {
        let path = parse_item(collection_link, ResourceKind::Collection)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let target = feed_path(&path.path(), ResourceKind::Document)?;

        let mut state = self.state.write();
        state.authorize(principal, &target, Access::Write, scope_of(partition))?;

        let collection = state.collection(&db, &coll)?;
        let bucket = collection.bucket(partition)?;
        if let (Some(field), Some(partition)) = (collection.partition_field(), partition) {
            match document.get(field) {
                Some(value) if value == partition.value() => {}
                _ => {
                    return Err(EmulatorError::BadRequest(format!(
                        "Document field '{}' does not match partition key '{}'",
                        field, partition
                    )))
                }
            }
        }

        if document.id.is_empty() {
            document.id = Uuid::new_v4().to_string();
        }
        let link = child_link(&path.path(), ResourceKind::Document, &document.id);
        if collection
            .documents
            .get(&bucket)
            .is_some_and(|docs| docs.contains_key(&document.id))
        {
            return Err(EmulatorError::Conflict(link));
        }

        document.system = state.system(&link);
        state
            .collection_mut(&db, &coll)?
            .documents
            .entry(bucket)
            .or_default()
            .insert(document.id.clone(), document.clone());
        debug!(document = %link, "created document");
        Ok(document)
    }

    pub fn delete_document(
        &self,
        principal: &Principal,
        link: &str,
        partition: Option<&PartitionKey>,
    ) -> Result<()> {
        let path = parse_item(link, ResourceKind::Document)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let id = id_of(&path, ResourceKind::Document)?;

        let mut state = self.state.write();
        state.authorize(principal, &path, Access::Write, scope_of(partition))?;
        let collection = state.collection_mut(&db, &coll)?;
        let bucket = collection.bucket(partition)?;
        let removed = collection
            .documents
            .get_mut(&bucket)
            .and_then(|docs| docs.remove(&id));
        match removed {
            Some(_) => Ok(()),
            None => Err(EmulatorError::NotFound(path.path())),
        }
    }

    /// Documents matching `query`, scoped by `options`. A partitioned
    /// collection needs either a partition key or cross-partition enabled.
    pub fn query_documents(
        &self,
        principal: &Principal,
        collection_link: &str,
        query: &QuerySpec,
        options: &FeedOptions,
    ) -> Result<Vec<Document>> {
        let path = parse_item(collection_link, ResourceKind::Collection)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let target = feed_path(&path.path(), ResourceKind::Document)?;
        let filter = DocumentQuery::parse(query)?;

        let state = self.state.read();
        state.authorize(principal, &target, Access::Read, partition_scope(options))?;
        let collection = state.collection(&db, &coll)?;

        let matching: Vec<Document> = match &options.partition_key {
            Some(partition) => {
                let bucket = collection.bucket(Some(partition))?;
                collection
                    .documents
                    .get(&bucket)
                    .into_iter()
                    .flat_map(BTreeMap::values)
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            }
            None => {
                if collection.partition_field().is_some() && !options.enable_cross_partition {
                    return Err(EmulatorError::BadRequest(
                        "Cross partition query is required but disabled".to_string(),
                    ));
                }
                collection
                    .all_documents()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            }
        };
        Ok(matching)
    }

    pub fn create_stored_procedure(
        &self,
        principal: &Principal,
        collection_link: &str,
        procedure: &StoredProcedure,
    ) -> Result<StoredProcedure> {
        let path = parse_item(collection_link, ResourceKind::Collection)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        if procedure.id.is_empty() {
            return Err(EmulatorError::BadRequest(
                "Stored procedure id is required".to_string(),
            ));
        }
        let link = child_link(&path.path(), ResourceKind::StoredProcedure, &procedure.id);

        let mut state = self.state.write();
        state.require_master(principal, "Creating a stored procedure")?;
        if state
            .collection(&db, &coll)?
            .procedures
            .contains_key(&procedure.id)
        {
            return Err(EmulatorError::Conflict(link));
        }
        let created = StoredProcedure {
            id: procedure.id.clone(),
            body: procedure.body.clone(),
            system: state.system(&link),
        };
        state
            .collection_mut(&db, &coll)?
            .procedures
            .insert(created.id.clone(), created.clone());
        if !self.procedures.is_bound(&created.id) {
            debug!(procedure = %created.id, "stored procedure has no native handler bound");
        }
        Ok(created)
    }

    pub fn read_stored_procedure(&self, principal: &Principal, link: &str) -> Result<StoredProcedure> {
        let path = parse_item(link, ResourceKind::StoredProcedure)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let id = id_of(&path, ResourceKind::StoredProcedure)?;

        let state = self.state.read();
        state.authorize(principal, &path, Access::Read, PartitionScope::Unscoped)?;
        state
            .collection(&db, &coll)?
            .procedures
            .get(&id)
            .cloned()
            .ok_or_else(|| EmulatorError::NotFound(path.path()))
    }

    pub fn delete_stored_procedure(&self, principal: &Principal, link: &str) -> Result<()> {
        let path = parse_item(link, ResourceKind::StoredProcedure)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let id = id_of(&path, ResourceKind::StoredProcedure)?;

        let mut state = self.state.write();
        state.require_master(principal, "Deleting a stored procedure")?;
        match state.collection_mut(&db, &coll)?.procedures.remove(&id) {
            Some(_) => Ok(()),
            None => Err(EmulatorError::NotFound(path.path())),
        }
    }

    /// Runs the native handler bound to the procedure's id over the
    /// documents of one partition. Resource tokens are always refused, even
    /// when a permission covers the procedure.
    pub fn execute_stored_procedure(
        &self,
        principal: &Principal,
        link: &str,
        params: &[Value],
        partition: Option<&PartitionKey>,
    ) -> Result<Value> {
        let path = parse_item(link, ResourceKind::StoredProcedure)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let coll = id_of(&path, ResourceKind::Collection)?;
        let id = id_of(&path, ResourceKind::StoredProcedure)?;

        let state = self.state.read();
        state.authorize(principal, &path, Access::Read, scope_of(partition))?;
        if !principal.is_master() {
            return Err(EmulatorError::Forbidden(format!(
                "Executing '{}' with a resource token is not permitted",
                id
            )));
        }

        let collection = state.collection(&db, &coll)?;
        if !collection.procedures.contains_key(&id) {
            return Err(EmulatorError::NotFound(path.path()));
        }
        let bucket = collection.bucket(partition)?;
        let documents: Vec<Document> = collection
            .documents
            .get(&bucket)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        let partition = partition
            .cloned()
            .unwrap_or_else(|| PartitionKey::from(Value::Null));
        drop(state);

        let ctx = ProcedureContext {
            name: &id,
            partition: &partition,
            documents: &documents,
        };
        self.procedures.execute(&ctx, params)
    }

    pub fn read_user(&self, principal: &Principal, link: &str) -> Result<User> {
        let path = parse_item(link, ResourceKind::User)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let id = id_of(&path, ResourceKind::User)?;
        let state = self.state.read();
        state.require_master(principal, "Reading a user")?;
        Ok(state.user(&db, &id)?.user.clone())
    }

    pub fn create_user(&self, principal: &Principal, database_link: &str, id: &str) -> Result<User> {
        let path = parse_item(database_link, ResourceKind::Database)?;
        let db = id_of(&path, ResourceKind::Database)?;
        if id.is_empty() {
            return Err(EmulatorError::BadRequest("User id is required".to_string()));
        }
        let link = child_link(&path.path(), ResourceKind::User, id);

        let mut state = self.state.write();
        state.require_master(principal, "Creating a user")?;
        if state.database(&db)?.users.contains_key(id) {
            return Err(EmulatorError::Conflict(link));
        }
        let user = User {
            id: id.to_string(),
            permissions_link: format!("{}/", docdb_client::link::feed_link(&link, ResourceKind::Permission)),
            system: state.system(&link),
        };
        state.database_mut(&db)?.users.insert(
            id.to_string(),
            UserState {
                user: user.clone(),
                permissions: BTreeMap::new(),
            },
        );
        Ok(user)
    }

    /// Deletes a user and revokes every token issued for its permissions.
    pub fn delete_user(&self, principal: &Principal, link: &str) -> Result<()> {
        let path = parse_item(link, ResourceKind::User)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let id = id_of(&path, ResourceKind::User)?;

        let mut state = self.state.write();
        state.require_master(principal, "Deleting a user")?;
        if state.database_mut(&db)?.users.remove(&id).is_none() {
            return Err(EmulatorError::NotFound(path.path()));
        }
        state
            .grants
            .retain(|_, grant| !(grant.database == db && grant.user == id));
        Ok(())
    }

    pub fn list_permissions(&self, principal: &Principal, user_link: &str) -> Result<Vec<Permission>> {
        let path = parse_item(user_link, ResourceKind::User)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let user = id_of(&path, ResourceKind::User)?;
        let state = self.state.read();
        state.require_master(principal, "Listing permissions")?;
        Ok(state.user(&db, &user)?.permissions.values().cloned().collect())
    }

    /// Creates a permission and issues its resource token. The partition
    /// argument scopes the grant when the definition carries no
    /// `resourcePartitionKey` of its own.
    pub fn create_permission(
        &self,
        principal: &Principal,
        user_link: &str,
        definition: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let path = parse_item(user_link, ResourceKind::User)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let user = id_of(&path, ResourceKind::User)?;
        if definition.id.is_empty() {
            return Err(EmulatorError::BadRequest("Permission id is required".to_string()));
        }
        let resource = ResourcePath::parse(&definition.resource)?;
        if resource.is_feed() {
            return Err(EmulatorError::BadRequest(format!(
                "Permission resource '{}' must name a single resource",
                definition.resource
            )));
        }
        let link = child_link(&path.path(), ResourceKind::Permission, &definition.id);

        let mut state = self.state.write();
        state.require_master(principal, "Creating a permission")?;
        if state.user(&db, &user)?.permissions.contains_key(&definition.id) {
            return Err(EmulatorError::Conflict(link));
        }

        let token = format!("{}{}", RESOURCE_TOKEN_PREFIX, Uuid::new_v4().simple());
        let mut permission = definition.definition();
        if permission.resource_partition_key.is_none() {
            if let Some(partition) = partition {
                permission = permission.with_partition(partition);
            }
        }
        permission.token = token.clone();
        permission.system = state.system(&link);

        state
            .user_mut(&db, &user)?
            .permissions
            .insert(permission.id.clone(), permission.clone());
        state.grants.insert(
            token,
            Grant {
                database: db,
                user,
                permission: permission.id.clone(),
            },
        );
        debug!(permission = %link, "issued resource token");
        Ok(permission)
    }

    /// Replaces a permission's definition. The issued token stays valid and
    /// follows the new scope.
    pub fn replace_permission(
        &self,
        principal: &Principal,
        link: &str,
        definition: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let path = parse_item(link, ResourceKind::Permission)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let user = id_of(&path, ResourceKind::User)?;
        let id = id_of(&path, ResourceKind::Permission)?;
        if !definition.id.is_empty() && definition.id != id {
            return Err(EmulatorError::BadRequest(format!(
                "Permission id '{}' does not match '{}'",
                definition.id, id
            )));
        }
        ResourcePath::parse(&definition.resource)?;

        let mut state = self.state.write();
        state.require_master(principal, "Replacing a permission")?;
        let mut permission = state
            .user(&db, &user)?
            .permissions
            .get(&id)
            .cloned()
            .ok_or_else(|| EmulatorError::NotFound(path.path()))?;

        permission.mode = definition.mode;
        permission.resource = definition.resource.clone();
        permission.resource_partition_key = definition.resource_partition_key.clone();
        if permission.resource_partition_key.is_none() {
            if let Some(partition) = partition {
                permission = permission.with_partition(partition);
            }
        }
        let mut system = permission.system.clone();
        state.touch(&mut system);
        permission.system = system;

        state
            .user_mut(&db, &user)?
            .permissions
            .insert(id, permission.clone());
        Ok(permission)
    }

    pub fn delete_permission(&self, principal: &Principal, link: &str) -> Result<()> {
        let path = parse_item(link, ResourceKind::Permission)?;
        let db = id_of(&path, ResourceKind::Database)?;
        let user = id_of(&path, ResourceKind::User)?;
        let id = id_of(&path, ResourceKind::Permission)?;

        let mut state = self.state.write();
        state.require_master(principal, "Deleting a permission")?;
        let removed = state
            .user_mut(&db, &user)?
            .permissions
            .remove(&id)
            .ok_or_else(|| EmulatorError::NotFound(path.path()))?;
        state.grants.remove(&removed.token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::PARTITION_DOCUMENTS;
    use docdb_client::PermissionMode;
    use serde_json::json;

    const COLL: &str = "dbs/ToDoList/colls/Items";

    fn emulator() -> Emulator {
        let emulator = Emulator::new(EmulatorConfig::default()).unwrap();
        emulator.provision_database("ToDoList").unwrap();
        emulator
            .provision_collection(
                "ToDoList",
                "Items",
                Some(PartitionKeyDefinition::hash("partition")),
            )
            .unwrap();
        emulator
    }

    fn doc(partition: &str) -> Document {
        Document::new().with_field("partition", partition)
    }

    fn token_for(emulator: &Emulator, resource: &str, partition: &str) -> Principal {
        let master = Principal::Master;
        emulator
            .create_user(&master, "dbs/ToDoList", "testuser")
            .unwrap();
        let permission = emulator
            .create_permission(
                &master,
                "dbs/ToDoList/users/testuser",
                &Permission::new("scoped", PermissionMode::All, resource),
                Some(&PartitionKey::from(partition)),
            )
            .unwrap();
        Principal::ResourceToken(permission.token)
    }

    #[test]
    fn documents_are_partitioned_and_ids_assigned() {
        let emulator = emulator();
        let master = Principal::Master;
        let part_a = PartitionKey::from("partA");

        let created = emulator
            .create_document(&master, COLL, doc("partA"), Some(&part_a))
            .unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(
            created.system.self_link,
            format!("{}/docs/{}/", COLL, created.id)
        );

        let missing_partition = emulator.create_document(&master, COLL, doc("partA"), None);
        assert_eq!(missing_partition.unwrap_err().status(), 400);

        let mismatch = emulator.create_document(&master, COLL, doc("partB"), Some(&part_a));
        assert_eq!(mismatch.unwrap_err().status(), 400);

        let duplicate = emulator.create_document(
            &master,
            COLL,
            Document::with_id(created.id.clone()).with_field("partition", "partA"),
            Some(&part_a),
        );
        assert_eq!(duplicate.unwrap_err().status(), 409);
    }

    #[test]
    fn queries_need_a_partition_or_cross_partition() {
        let emulator = emulator();
        let master = Principal::Master;
        for p in ["partA", "partB", "partB"] {
            emulator
                .create_document(&master, COLL, doc(p), Some(&PartitionKey::from(p)))
                .unwrap();
        }
        let all = QuerySpec::new("SELECT * FROM root");

        let err = emulator
            .query_documents(&master, COLL, &all, &FeedOptions::default())
            .unwrap_err();
        assert_eq!(err.status(), 400);

        let everything = emulator
            .query_documents(&master, COLL, &all, &FeedOptions::cross_partition())
            .unwrap();
        assert_eq!(everything.len(), 3);

        let part_b = emulator
            .query_documents(&master, COLL, &all, &FeedOptions::partition("partB"))
            .unwrap();
        assert_eq!(part_b.len(), 2);
    }

    #[test]
    fn resource_token_is_limited_to_its_partition() {
        let emulator = emulator();
        let restricted = token_for(&emulator, &format!("{}/", COLL), "partB");
        let part_a = PartitionKey::from("partA");
        let part_b = PartitionKey::from("partB");

        assert!(emulator
            .create_document(&restricted, COLL, doc("partB"), Some(&part_b))
            .is_ok());
        let denied = emulator
            .create_document(&restricted, COLL, doc("partA"), Some(&part_a))
            .unwrap_err();
        assert_eq!(denied.status(), 403);

        let all = QuerySpec::new("SELECT * FROM root");
        assert_eq!(
            emulator
                .query_documents(&restricted, COLL, &all, &FeedOptions::partition("partB"))
                .unwrap()
                .len(),
            1
        );
        let cross = emulator
            .query_documents(&restricted, COLL, &all, &FeedOptions::cross_partition())
            .unwrap_err();
        assert_eq!(cross.status(), 403);
    }

    #[test]
    fn resource_tokens_cannot_manage_users_or_execute_procedures() {
        let emulator = emulator();
        let sproc_link = format!("{}/sprocs/getAllDocs", COLL);
        emulator
            .create_stored_procedure(
                &Principal::Master,
                COLL,
                &StoredProcedure::new("getAllDocs", "function () {}"),
            )
            .unwrap();
        emulator
            .procedures()
            .register_builtin("getAllDocs", PARTITION_DOCUMENTS)
            .unwrap();
        let restricted = token_for(&emulator, &sproc_link, "partB");
        let part_b = PartitionKey::from("partB");

        let err = emulator
            .execute_stored_procedure(&restricted, &sproc_link, &[json!("partB")], Some(&part_b))
            .unwrap_err();
        assert_eq!(err.status(), 403);

        let master_run = emulator
            .execute_stored_procedure(
                &Principal::Master,
                &sproc_link,
                &[json!("partB")],
                Some(&part_b),
            )
            .unwrap();
        assert_eq!(master_run, json!("no docs found"));

        let err = emulator
            .create_user(&restricted, "dbs/ToDoList", "intruder")
            .unwrap_err();
        assert_eq!(err.status(), 403);

        let unknown = Principal::ResourceToken(format!("{}nope", RESOURCE_TOKEN_PREFIX));
        let err = emulator.read_user(&unknown, "dbs/ToDoList/users/testuser").unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn replacing_a_permission_bumps_its_timestamp_and_keeps_the_token() {
        let emulator = emulator();
        let master = Principal::Master;
        emulator.create_user(&master, "dbs/ToDoList", "u").unwrap();
        let created = emulator
            .create_permission(
                &master,
                "dbs/ToDoList/users/u",
                &Permission::new("p", PermissionMode::All, COLL),
                Some(&PartitionKey::from("partA")),
            )
            .unwrap();

        let replaced = emulator
            .replace_permission(
                &master,
                &created.system.self_link,
                &Permission::new("p", PermissionMode::All, COLL)
                    .with_partition(&PartitionKey::from("partB")),
                None,
            )
            .unwrap();

        assert!(replaced.system.ts > created.system.ts);
        assert_eq!(replaced.token, created.token);
        assert_eq!(replaced.system.rid, created.system.rid);
        assert_eq!(replaced.scoped_partition(), Some(PartitionKey::from("partB")));

        let restricted = Principal::ResourceToken(created.token.clone());
        let part_b = PartitionKey::from("partB");
        assert!(emulator
            .create_document(&restricted, COLL, doc("partB"), Some(&part_b))
            .is_ok());
    }

    #[test]
    fn deleting_a_user_revokes_its_tokens() {
        let emulator = emulator();
        let restricted = token_for(&emulator, COLL, "partB");
        emulator
            .delete_user(&Principal::Master, "dbs/ToDoList/users/testuser")
            .unwrap();
        let err = emulator
            .query_documents(
                &restricted,
                COLL,
                &QuerySpec::new("SELECT * FROM root"),
                &FeedOptions::partition("partB"),
            )
            .unwrap_err();
        assert_eq!(err.status(), 401);

        let again = emulator.delete_user(&Principal::Master, "dbs/ToDoList/users/testuser");
        assert_eq!(again.unwrap_err().status(), 404);
    }

    #[test]
    fn authenticate_checks_master_signatures() {
        let emulator = emulator();
        let key = MasterKey::from_base64(crate::config::WELL_KNOWN_MASTER_KEY).unwrap();
        let date = "Tue, 01 Oct 2024 10:00:00 GMT";
        let path = ResourcePath::parse(COLL).unwrap();
        let token = key
            .sign("GET", path.resource_type(), &path.resource_link(), date)
            .unwrap();
        let header = docdb_client::auth::encode_header(&token);

        assert_eq!(
            emulator
                .authenticate(Some(&header), "GET", &path, Some(date))
                .unwrap(),
            Principal::Master
        );
        assert!(emulator
            .authenticate(Some(&header), "DELETE", &path, Some(date))
            .is_err());
        assert!(emulator.authenticate(None, "GET", &path, Some(date)).is_err());
        assert!(emulator.authenticate(Some(&header), "GET", &path, None).is_err());
    }
}
