pub mod tenant;

pub use tenant::{
    resolve_tenant_permissive, resolve_tenant_strict, TenantContext, TENANT_HEADER, TENANT_PARAM,
    TENANT_QUERY,
};
