use std::path::Path;

use certhop_core::IssuedCertificate;
use certhop_core::config::write_private;
use tracing::{info, warn};
use x509_parser::parse_x509_certificate;

/// Log the validity window of the leaf certificate
pub fn log_validity(issued: &IssuedCertificate) {
    let der = match issued.certificate.x509.to_der() {
        Ok(der) => der,
        Err(e) => {
            warn!(error = %e, "Failed to encode certificate");
            return;
        }
    };

    match parse_x509_certificate(&der) {
        Ok((_, certificate)) => {
            let validity = certificate.validity();
            let days = validity
                .time_to_expiration()
                .map(|d| d.whole_days())
                .unwrap_or(0);
            info!(
                subject = %certificate.subject(),
                not_after = %validity.not_after,
                days,
                "Certificate valid until"
            );
        }
        Err(e) => warn!(error = %e, "Failed to parse issued certificate"),
    }
}

/// Write `cert.pem`, `chain.pem` and `privkey.pem` (owner-only) into `dir`
pub fn write_files(dir: &Path, issued: &IssuedCertificate) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;

    std::fs::write(dir.join("cert.pem"), issued.certificate_pem()?)?;
    std::fs::write(dir.join("chain.pem"), issued.chain_pem()?)?;

    write_private(&dir.join("privkey.pem"), issued.private_key_pem()?.as_bytes())?;

    info!(dir = %dir.display(), "Wrote certificate files");
    Ok(())
}
