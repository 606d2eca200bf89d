/// Shared fixtures for unit tests
use crate::{
    crypto::OperationSigner,
    document::{DocumentState, KeyPurpose, PublicKey, Service},
    operation::{BuiltOperation, OperationBuilder, SigningKeyHandle, UpdateAction},
};

/// A freshly created DID with a master key, one auth key and one service
pub(crate) struct DidFixture {
    pub master: SigningKeyHandle,
    pub auth: OperationSigner,
    pub create: BuiltOperation,
    /// State seeded by `create`
    pub state: DocumentState,
}

impl DidFixture {
    pub fn new() -> Self {
        let master = SigningKeyHandle::new("master0", OperationSigner::generate());
        let auth = OperationSigner::generate();

        let master_key = PublicKey {
            id: "master0".to_string(),
            purpose: KeyPurpose::Master,
            public_key_hex: master.signer.public_key_hex(),
        };
        let auth_key = PublicKey {
            id: "auth-1".to_string(),
            purpose: KeyPurpose::Authentication,
            public_key_hex: auth.public_key_hex(),
        };
        let service = service("svc-1");

        let state = DocumentState::from_create(
            &[master_key.clone(), auth_key.clone()],
            std::slice::from_ref(&service),
        )
        .unwrap();

        let create = OperationBuilder::new()
            .public_key(master_key)
            .public_key(auth_key)
            .service(service)
            .build_create(&[master.clone()])
            .unwrap();

        Self {
            master,
            auth,
            create,
            state,
        }
    }

    /// Signed update built against the create state
    pub fn update(&self, previous: &str, actions: Vec<UpdateAction>) -> BuiltOperation {
        self.update_on(&self.state, previous, actions)
    }

    /// Signed update built against an arbitrary state
    pub fn update_on(
        &self,
        state: &DocumentState,
        previous: &str,
        actions: Vec<UpdateAction>,
    ) -> BuiltOperation {
        OperationBuilder::new()
            .did(self.create.did.clone())
            .previous_operation_hash(previous)
            .current_state(state.clone())
            .actions(actions)
            .build_update(&[self.master.clone()])
            .unwrap()
    }

    pub fn add_service(&self, id: &str, previous: &str) -> BuiltOperation {
        self.update(previous, vec![UpdateAction::AddService(service(id))])
    }

    pub fn add_service_after(&self, previous: &BuiltOperation, id: &str) -> BuiltOperation {
        self.add_service(id, &previous.hash)
    }

    pub fn deactivate(&self, previous: &str) -> BuiltOperation {
        OperationBuilder::new()
            .did(self.create.did.clone())
            .previous_operation_hash(previous)
            .current_state(self.state.clone())
            .build_deactivate(&[self.master.clone()])
            .unwrap()
    }
}

pub(crate) fn service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        service_type: "LinkedDomains".to_string(),
        service_endpoint: vec![format!("https://{}.example.com", id)],
    }
}
