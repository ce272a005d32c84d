//! Device lifecycle: taxpayer verification, registration, certificate
//! renewal, config, heartbeat and transport-layer identity resolution.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fdms_core::{
    Branch, Device, DeviceStatus, ErrorCode, OperatingMode, Tax, Taxpayer, TaxpayerStatus,
    Thumbprint,
};
use fdms_pki::PkiError;
use fdms_store::Store;

use crate::error::{DomainError, FdmsError, Result};
use crate::Fdms;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTaxpayerRequest {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    pub activation_key: String,
    pub device_serial_no: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTaxpayerResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub taxpayer_name: String,
    #[serde(rename = "taxpayerTIN")]
    pub taxpayer_tin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
    pub branch: Branch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    #[serde(rename = "deviceID")]
    pub device_id: u32,
    pub activation_key: String,
    pub certificate_request: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub certificate: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewCertificateRequest {
    pub certificate_request: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub taxpayer_name: String,
    #[serde(rename = "taxpayerTIN")]
    pub taxpayer_tin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
    pub device_serial_no: String,
    pub branch: Branch,
    pub operating_mode: OperatingMode,
    pub day_max_hours: i64,
    pub day_end_notification_hours: i64,
    pub applicable_taxes: Vec<Tax>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_valid_till: Option<NaiveDateTime>,
    pub qr_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    #[serde(rename = "operationID")]
    pub operation_id: String,
    pub reporting_frequency: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCertificateResponse {
    pub certificate: Vec<String>,
    pub certificate_valid_till: NaiveDateTime,
}

impl<S: Store> Fdms<S> {
    /// Resolve the device presenting a client certificate. The SHA-1
    /// thumbprint of the TLS peer certificate is the identity; request
    /// bodies that repeat a device id must agree with the result.
    pub async fn authenticate(&self, thumbprint: &Thumbprint) -> Result<Device> {
        self.store
            .get_device_by_thumbprint(thumbprint)
            .await?
            .ok_or_else(|| DomainError::unauthorized("Certificate not recognized").into())
    }

    /// Pre-registration taxpayer display. Read-only.
    pub async fn verify_taxpayer(
        &self,
        request: VerifyTaxpayerRequest,
        model_name: &str,
        model_version: &str,
    ) -> Result<VerifyTaxpayerResponse> {
        self.check_model(model_name, model_version)?;

        let device = self.require_device(request.device_id).await?;
        if !device.activation_key_matches(&request.activation_key) {
            return Err(FdmsError::domain(
                ErrorCode::Dev02,
                "Activation key is incorrect",
            ));
        }
        if device.serial_no != request.device_serial_no {
            return Err(FdmsError::domain(
                ErrorCode::Dev01,
                "Device serial number mismatch",
            ));
        }
        let taxpayer = self.require_active_taxpayer(&device).await?;

        Ok(VerifyTaxpayerResponse {
            operation_id: self.ids().operation_id(),
            taxpayer_name: taxpayer.name,
            taxpayer_tin: taxpayer.tin,
            vat_number: taxpayer.vat_number,
            branch: device.branch,
        })
    }

    /// Bootstrap a device identity: validate the activation key, issue
    /// the first certificate from the CSR and store it.
    pub async fn register_device(
        &self,
        request: RegisterDeviceRequest,
        model_name: &str,
        model_version: &str,
    ) -> Result<RegisterDeviceResponse> {
        self.check_model(model_name, model_version)?;

        let device = self.require_device(request.device_id).await?;
        if !device.activation_key_matches(&request.activation_key) {
            return Err(FdmsError::domain(
                ErrorCode::Dev02,
                "Activation key is incorrect",
            ));
        }
        if device.status != DeviceStatus::Active {
            return Err(FdmsError::domain(ErrorCode::Dev01, "Device is not active"));
        }
        self.require_active_taxpayer(&device).await?;

        let certificate = self
            .issue_and_store(&device, &request.certificate_request)
            .await?;
        info!(device_id = device.device_id, "device registered");

        Ok(RegisterDeviceResponse {
            operation_id: self.ids().operation_id(),
            certificate,
        })
    }

    /// Certificate renewal over an authenticated channel.
    pub async fn renew_certificate(
        &self,
        device_id: u32,
        request: RenewCertificateRequest,
    ) -> Result<RegisterDeviceResponse> {
        let device = self.require_device(device_id).await?;
        if device.status != DeviceStatus::Active {
            return Err(FdmsError::domain(ErrorCode::Dev01, "Device is not active"));
        }

        let certificate = self
            .issue_and_store(&device, &request.certificate_request)
            .await?;
        info!(device_id, "device certificate renewed");

        Ok(RegisterDeviceResponse {
            operation_id: self.ids().operation_id(),
            certificate,
        })
    }

    /// Taxpayer, branch and tax-table configuration for a device.
    pub async fn get_config(&self, device_id: u32) -> Result<ConfigResponse> {
        let device = self.require_device(device_id).await?;
        let taxpayer = self.require_taxpayer(&device).await?;
        let taxes = self.store.list_taxes().await?;

        Ok(ConfigResponse {
            operation_id: self.ids().operation_id(),
            taxpayer_name: taxpayer.name,
            taxpayer_tin: taxpayer.tin,
            vat_number: taxpayer.vat_number,
            device_serial_no: device.serial_no,
            branch: device.branch,
            operating_mode: device.operating_mode,
            day_max_hours: taxpayer.day_max_hours,
            day_end_notification_hours: taxpayer.day_end_notification_hours,
            applicable_taxes: taxes,
            certificate_valid_till: device.certificate_valid_till,
            qr_url: taxpayer.qr_url_base,
        })
    }

    /// Heartbeat: stamps the device row, returns the reporting interval.
    pub async fn ping(&self, device_id: u32) -> Result<PingResponse> {
        self.store
            .update_last_ping(device_id, self.clock().now())
            .await?;
        Ok(PingResponse {
            operation_id: self.ids().operation_id(),
            reporting_frequency: self.config.reporting_frequency_minutes,
        })
    }

    /// The server certificate chain, with an optional thumbprint check.
    pub fn server_certificate(
        &self,
        expected_thumbprint: Option<Thumbprint>,
    ) -> Result<ServerCertificateResponse> {
        let (certificate, certificate_valid_till) = self
            .chain()
            .get(expected_thumbprint)
            .map_err(|e| match e {
                PkiError::ThumbprintMismatch => FdmsError::domain(
                    ErrorCode::Dev08,
                    "Certificate thumbprint does not match",
                ),
                other => FdmsError::Pki(other),
            })?;
        Ok(ServerCertificateResponse {
            certificate,
            certificate_valid_till,
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // Shared lookups
    // ─────────────────────────────────────────────────────────────────

    pub(crate) async fn require_device(&self, device_id: u32) -> Result<Device> {
        self.store
            .get_device(device_id)
            .await?
            .ok_or_else(|| FdmsError::domain(ErrorCode::Dev01, "Device not found"))
    }

    pub(crate) fn require_online(&self, device: &Device) -> Result<()> {
        if device.operating_mode == OperatingMode::Offline {
            return Err(FdmsError::domain(
                ErrorCode::Dev01,
                "Device operating mode is Offline",
            ));
        }
        Ok(())
    }

    pub(crate) async fn require_taxpayer(&self, device: &Device) -> Result<Taxpayer> {
        self.store
            .get_taxpayer(device.taxpayer_id)
            .await?
            .ok_or_else(|| {
                FdmsError::Store(fdms_store::StoreError::NotFound(format!(
                    "taxpayer {} of device {}",
                    device.taxpayer_id, device.device_id
                )))
            })
    }

    async fn require_active_taxpayer(&self, device: &Device) -> Result<Taxpayer> {
        let taxpayer = self.require_taxpayer(device).await?;
        if taxpayer.status != TaxpayerStatus::Active {
            return Err(FdmsError::domain(
                ErrorCode::Dev05,
                "Taxpayer is not active",
            ));
        }
        Ok(taxpayer)
    }

    fn check_model(&self, model_name: &str, model_version: &str) -> Result<()> {
        if self.config.is_blacklisted(model_name, model_version) {
            warn!(model_name, model_version, "blacklisted device model");
            return Err(FdmsError::domain(
                ErrorCode::Dev04,
                "Device model is blacklisted",
            ));
        }
        Ok(())
    }

    async fn issue_and_store(&self, device: &Device, csr_pem: &str) -> Result<String> {
        let now = self.clock().now();
        let issued = self
            .ca()
            .issue(csr_pem, device.device_id, &device.serial_no, now)
            .map_err(|e| match e {
                PkiError::CaUnavailable(_) | PkiError::SigningUnavailable(_) => FdmsError::Pki(e),
                other => FdmsError::Domain(
                    DomainError::unprocessable(
                        ErrorCode::Dev03,
                        "Certificate request is invalid",
                    )
                    .with_detail(other.to_string()),
                ),
            })?;

        self.store
            .update_device_certificate(
                device.device_id,
                &issued.pem,
                issued.thumbprint,
                issued.valid_till,
                now,
            )
            .await?;
        Ok(issued.pem)
    }
}
